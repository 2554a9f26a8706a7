//! Accepted change record and pipeline outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change::{EditSet, Revision};
use super::validation::ValidationResult;

/// Append-only record of an accepted edit set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitRecord {
    /// Revision produced by the commit.
    pub revision: Revision,
    /// The edit set that was committed.
    pub edit_set: EditSet,
    /// Acceptance time.
    pub accepted_at: DateTime<Utc>,
}

impl CommitRecord {
    /// Record a commit accepted now.
    #[must_use]
    pub fn new(revision: Revision, edit_set: EditSet) -> Self {
        Self {
            revision,
            edit_set,
            accepted_at: Utc::now(),
        }
    }
}

/// Terminal result of handling one outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Validation passed and the edit set is committed.
    Committed(CommitRecord),
    /// The change was refused; carries every failing check.
    Rejected(ValidationResult),
    /// Nothing to apply; carries the reason.
    Skipped(String),
}

impl PipelineOutcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Committed(_) => "committed",
            Self::Rejected(_) => "rejected",
            Self::Skipped(_) => "skipped",
        }
    }
}
