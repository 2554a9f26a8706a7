//! Version-control collaborator.
//!
//! The commit stage only needs two things from the repository: the current
//! revision, and a way to record the edit set's files (already written to
//! the live tree) as a new revision.

pub mod git;
pub mod memory;

use futures_util::future::BoxFuture;

use crate::models::{EditSet, Revision};
use crate::Result;

pub use git::GitRepository;
pub use memory::MemoryVcs;

/// Repository the accepted changes are committed to.
pub trait VersionControl: Send + Sync {
    /// Revision the working tree is currently at.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Vcs` if the revision cannot be determined.
    fn current_revision(&self) -> BoxFuture<'_, Result<Revision>>;

    /// Record the files of `edit_set` as a new revision with `message`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Vcs` if staging or committing fails; the
    /// repository revision is unchanged in that case.
    fn commit<'a>(&'a self, edit_set: &'a EditSet, message: &'a str)
        -> BoxFuture<'a, Result<Revision>>;
}
