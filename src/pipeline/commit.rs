//! Commit stage: the only writer of the live tree.
//!
//! Commits are serialized by a single mutex so the revision check and the
//! revision advance happen atomically with respect to other commits. A
//! commit either lands every file of its edit set or restores all of them.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};

use super::lease::LeaseGuard;
use crate::models::{CommitRecord, EditSet, MessageId, ValidationResult};
use crate::persistence::commit_repo::CommitRepo;
use crate::vcs::VersionControl;
use crate::workspace::{fingerprint_of, read_optional, restore, write_atomic, Workspace};
use crate::{AppError, Result};

/// Records accepted edit sets and discards rejected ones.
#[derive(Clone)]
pub struct CommitStage {
    workspace: Workspace,
    vcs: Arc<dyn VersionControl>,
    commits: CommitRepo,
    serial: Arc<Mutex<()>>,
}

impl CommitStage {
    /// Stage writing to `workspace` and recording revisions in `vcs`.
    #[must_use]
    pub fn new(workspace: Workspace, vcs: Arc<dyn VersionControl>, commits: CommitRepo) -> Self {
        Self {
            workspace,
            vcs,
            commits,
            serial: Arc::new(Mutex::new(())),
        }
    }

    /// Commit already recorded for `origin`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the commit log cannot be read.
    pub async fn committed_for(&self, origin: &MessageId) -> Result<Option<CommitRecord>> {
        self.commits.get_by_origin(origin).await
    }

    /// Commit `edit_set`, which `result` must have passed.
    ///
    /// An origin message commits at most once: if the commit log already
    /// holds a record for it, that record is returned and nothing is written.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` if `result` did not pass.
    /// - `AppError::StaleRevision` if another commit landed since
    ///   `edit_set.base_revision`, or a target file changed underneath.
    /// - `AppError::LeaseExpired` if the lease was force-released.
    /// - `AppError::Io` / `AppError::Vcs` if writing or committing fails;
    ///   the live tree is restored first.
    pub async fn commit(
        &self,
        edit_set: &EditSet,
        result: &ValidationResult,
        lease: &LeaseGuard,
    ) -> Result<CommitRecord> {
        if !result.passed {
            return Err(AppError::Validation(
                "commit requires a passing validation result".into(),
            ));
        }

        let span = info_span!("commit", message_id = %edit_set.origin_message, agent = %edit_set.agent);
        async {
            let _serial = self.serial.lock().await;

            if let Some(existing) = self.commits.get_by_origin(&edit_set.origin_message).await? {
                warn!(revision = %existing.revision, "origin message already committed");
                return Ok(existing);
            }

            let current = self.vcs.current_revision().await?;
            if current != edit_set.base_revision {
                return Err(AppError::StaleRevision {
                    expected: edit_set.base_revision.to_string(),
                    actual: current.to_string(),
                });
            }
            lease.ensure_valid()?;

            let mut originals: Vec<(PathBuf, Option<String>)> = Vec::new();
            for path in edit_set.paths() {
                let absolute = self.workspace.resolve(path)?;
                let live = read_optional(&absolute)?;
                let expected = edit_set.base_fingerprints.get(path).cloned().flatten();
                if fingerprint_of(live.as_deref()) != expected {
                    return Err(AppError::StaleRevision {
                        expected: edit_set.base_revision.to_string(),
                        actual: format!("{current} with {path} modified in the working tree"),
                    });
                }
                originals.push((absolute, live));
            }

            let mut written = 0;
            let outcome = async {
                for ((absolute, _), content) in originals.iter().zip(edit_set.files.values()) {
                    write_atomic(absolute, content)?;
                    written += 1;
                }
                self.vcs.commit(edit_set, &edit_set.summary).await
            }
            .await;

            let revision = match outcome {
                Ok(revision) => revision,
                Err(err) => {
                    warn!(%err, written, "commit failed, restoring live tree");
                    for (absolute, original) in &originals[..written.min(originals.len())] {
                        if let Err(restore_err) = restore(absolute, original.as_deref()) {
                            error!(%restore_err, path = %absolute.display(), "failed to restore file");
                        }
                    }
                    return Err(err);
                }
            };

            let record = CommitRecord::new(revision, edit_set.clone());
            if let Err(err) = self.commits.append(&record).await {
                error!(%err, revision = %record.revision, "failed to append commit record");
            }

            info!(revision = %record.revision, files = edit_set.files.len(), "edit set committed");
            Ok(record)
        }
        .instrument(span)
        .await
    }

    /// Discard a rejected edit set.
    ///
    /// Validation only ever wrote to a disposable copy, so the live tree and
    /// the committed revision are already untouched. Targets that changed
    /// since materialization are reported; they were changed by someone else.
    pub fn discard(&self, edit_set: &EditSet, reason: &str) {
        for path in edit_set.paths() {
            let live = self
                .workspace
                .read(path)
                .map(|content| fingerprint_of(content.as_deref()));
            let expected = edit_set.base_fingerprints.get(path).cloned().flatten();
            if live.as_ref().ok() != Some(&expected) {
                warn!(path, "target changed outside the pipeline since materialization");
            }
        }

        info!(
            message_id = %edit_set.origin_message,
            agent = %edit_set.agent,
            files = edit_set.files.len(),
            reason,
            "edit set discarded"
        );
    }
}
