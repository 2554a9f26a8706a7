//! Validation outcome model.

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Result of running the check suite against an edit set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether every check passed.
    pub passed: bool,
    /// Identifiers of failing checks, in suite order.
    pub failing_checks: Vec<String>,
    /// Human-readable diagnostics.
    pub diagnostics: String,
}

impl ValidationResult {
    /// A passing result.
    #[must_use]
    pub fn pass(diagnostics: impl Into<String>) -> Self {
        Self {
            passed: true,
            failing_checks: Vec::new(),
            diagnostics: diagnostics.into(),
        }
    }

    /// A failing result with the given checks.
    #[must_use]
    pub fn fail(failing_checks: Vec<String>, diagnostics: impl Into<String>) -> Self {
        Self {
            passed: false,
            failing_checks,
            diagnostics: diagnostics.into(),
        }
    }

    /// Rejection produced by a pipeline error rather than a check run.
    #[must_use]
    pub fn from_error(err: &AppError) -> Self {
        Self::fail(vec![err.code().to_owned()], err.to_string())
    }
}
