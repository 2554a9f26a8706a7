//! In-process version control.
//!
//! Keeps a linear history in memory. Used when embedding the pipeline
//! without a real repository and throughout the test suite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use futures_util::future::BoxFuture;

use super::VersionControl;
use crate::models::{EditSet, Revision};
use crate::{AppError, Result};

/// A commit recorded by [`MemoryVcs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCommit {
    /// Revision created.
    pub revision: Revision,
    /// Paths included.
    pub paths: Vec<String>,
    /// Commit message.
    pub message: String,
}

/// Linear in-memory history starting at `rev-0`.
#[derive(Debug, Default)]
pub struct MemoryVcs {
    history: Mutex<Vec<MemoryCommit>>,
    fail_commits: AtomicBool,
}

impl MemoryVcs {
    /// Empty history at `rev-0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commit made outside the pipeline, moving the revision forward.
    pub fn advance(&self, message: &str) -> Revision {
        self.record(Vec::new(), message)
    }

    /// Make subsequent commits fail with `AppError::Vcs`.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Every commit so far, oldest first.
    #[must_use]
    pub fn commits(&self) -> Vec<MemoryCommit> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Revision the history is at.
    #[must_use]
    pub fn head(&self) -> Revision {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        Revision::new(format!("rev-{}", history.len()))
    }

    fn record(&self, paths: Vec<String>, message: &str) -> Revision {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let revision = Revision::new(format!("rev-{}", history.len() + 1));
        history.push(MemoryCommit {
            revision: revision.clone(),
            paths,
            message: message.to_owned(),
        });
        revision
    }
}

impl VersionControl for MemoryVcs {
    fn current_revision(&self) -> BoxFuture<'_, Result<Revision>> {
        Box::pin(async move { Ok(self.head()) })
    }

    fn commit<'a>(
        &'a self,
        edit_set: &'a EditSet,
        message: &'a str,
    ) -> BoxFuture<'a, Result<Revision>> {
        Box::pin(async move {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(AppError::Vcs("commit refused".into()));
            }
            Ok(self.record(edit_set.paths().map(str::to_owned).collect(), message))
        })
    }
}
