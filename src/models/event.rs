//! Structured notification events emitted by the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentId;

/// Classification of a core event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Agent went silent past the soft timeout; resume directive issued.
    Resumed,
    /// Agent went silent past the hard timeout; restart directive issued.
    Stalled,
    /// Execution context reinitialized.
    Restarted,
    /// Restart failed; agent needs external intervention.
    Quarantined,
    /// Edit set committed.
    Committed,
    /// Edit set rejected.
    Rejected,
}

/// Fire-and-forget notification record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoreEvent {
    /// Event classification.
    pub kind: EventKind,
    /// Agent concerned.
    pub agent: AgentId,
    /// Wall-clock emission time.
    pub timestamp: DateTime<Utc>,
    /// Free-form detail (revision, failing checks, reason).
    pub detail: String,
}

impl CoreEvent {
    /// Build an event stamped now.
    #[must_use]
    pub fn new(kind: EventKind, agent: AgentId, detail: impl Into<String>) -> Self {
        Self {
            kind,
            agent,
            timestamp: Utc::now(),
            detail: detail.into(),
        }
    }
}
