//! Change applier: materializes a descriptor into an edit set.
//!
//! Materialization happens entirely in memory against the live contents
//! of the target files. The live tree is not written here; the commit stage
//! does that after validation passes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info_span, Instrument};

use super::lease::{LeaseGuard, LeaseTable};
use super::locate::{is_balanced, locate};
use crate::models::{ChangeDescriptor, EditKind, EditOperation, EditSet, Location, Revision};
use crate::vcs::VersionControl;
use crate::workspace::{fingerprint_of, Workspace};
use crate::{AppError, Result};

/// An edit set together with the lease protecting its target files.
pub struct LeasedEditSet {
    /// Materialized file contents.
    pub edit_set: EditSet,
    /// Lease over `edit_set`'s target files; dropping it releases them.
    pub lease: LeaseGuard,
}

/// Turns descriptors into edit sets under per-file leases.
#[derive(Clone)]
pub struct ChangeApplier {
    workspace: Workspace,
    vcs: Arc<dyn VersionControl>,
    leases: LeaseTable,
}

impl ChangeApplier {
    /// Applier over `workspace`, checking revisions against `vcs`.
    #[must_use]
    pub fn new(workspace: Workspace, vcs: Arc<dyn VersionControl>, leases: LeaseTable) -> Self {
        Self {
            workspace,
            vcs,
            leases,
        }
    }

    /// Lease table shared with other appliers.
    #[must_use]
    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    /// Materialize `descriptor` against `base_revision`.
    ///
    /// Operations apply in listed order; each sees the result of the ones
    /// before it.
    ///
    /// # Errors
    ///
    /// - `AppError::StaleRevision` if the repository is not at `base_revision`.
    /// - `AppError::ConflictingTargets` if a target file is leased by another edit set.
    /// - `AppError::MalformedEdit` if an operation cannot be applied or breaks
    ///   the file's bracket structure.
    /// - `AppError::PathViolation` if a target escapes the workspace.
    pub async fn apply(
        &self,
        descriptor: &ChangeDescriptor,
        base_revision: &Revision,
    ) -> Result<LeasedEditSet> {
        let span = info_span!(
            "apply_descriptor",
            message_id = %descriptor.origin_message,
            agent = %descriptor.agent,
            revision = %base_revision,
        );
        self.materialize(descriptor, base_revision)
            .instrument(span)
            .await
    }

    async fn materialize(
        &self,
        descriptor: &ChangeDescriptor,
        base_revision: &Revision,
    ) -> Result<LeasedEditSet> {
        let current = self.vcs.current_revision().await?;
        if &current != base_revision {
            return Err(AppError::StaleRevision {
                expected: base_revision.to_string(),
                actual: current.to_string(),
            });
        }

        check_shape(descriptor)?;
        let mut paths = BTreeMap::new();
        for target in &descriptor.target_files {
            paths.insert(target.clone(), self.workspace.resolve(target)?);
        }

        let lease = self.leases.acquire(
            &descriptor.target_files,
            &descriptor.origin_message,
            &descriptor.agent,
        )?;

        let mut originals = BTreeMap::new();
        for (target, path) in &paths {
            originals.insert(target.clone(), crate::workspace::read_optional(path)?);
        }

        let mut working: BTreeMap<String, Option<String>> = originals.clone();
        for (index, op) in descriptor.operations.iter().enumerate() {
            let current = working.get(&op.path).cloned().flatten();
            let next = apply_operation(current.as_deref(), op)
                .map_err(|err| annotate(err, index, op))?;
            working.insert(op.path.clone(), Some(next));
        }

        let mut files = BTreeMap::new();
        let mut base_fingerprints = BTreeMap::new();
        for (target, content) in working {
            let original = originals.get(&target).cloned().flatten();
            let Some(content) = content else { continue };
            if original.as_deref() == Some(content.as_str()) {
                continue;
            }
            let was_balanced = original.as_deref().is_none_or(is_balanced);
            if was_balanced && !is_balanced(&content) {
                return Err(AppError::MalformedEdit(format!(
                    "{target}: edit leaves unbalanced brackets"
                )));
            }
            base_fingerprints.insert(target.clone(), fingerprint_of(original.as_deref()));
            files.insert(target, content);
        }

        if files.is_empty() {
            return Err(AppError::MalformedEdit(
                "descriptor does not change any file".into(),
            ));
        }

        debug!(files = files.len(), "edit set materialized");

        Ok(LeasedEditSet {
            edit_set: EditSet {
                files,
                base_revision: base_revision.clone(),
                base_fingerprints,
                origin_message: descriptor.origin_message.clone(),
                agent: descriptor.agent.clone(),
                summary: descriptor.summary.clone().unwrap_or_else(|| {
                    format!("apply change from {}", descriptor.origin_message)
                }),
            },
            lease,
        })
    }
}

fn check_shape(descriptor: &ChangeDescriptor) -> Result<()> {
    if descriptor.target_files.is_empty() || descriptor.operations.is_empty() {
        return Err(AppError::MalformedEdit(
            "descriptor needs target files and operations".into(),
        ));
    }
    for op in &descriptor.operations {
        if !descriptor.target_files.contains(&op.path) {
            return Err(AppError::MalformedEdit(format!(
                "{} is not listed in target_files",
                op.path
            )));
        }
    }
    Ok(())
}

fn annotate(err: AppError, index: usize, op: &EditOperation) -> AppError {
    match err {
        AppError::MalformedEdit(msg) => {
            AppError::MalformedEdit(format!("operation {} on {}: {msg}", index + 1, op.path))
        }
        other => other,
    }
}

/// Apply one operation to the current content of its file (`None` if absent).
fn apply_operation(current: Option<&str>, op: &EditOperation) -> Result<String> {
    let content = || {
        op.content
            .as_deref()
            .ok_or_else(|| AppError::MalformedEdit(format!("{:?} needs content", op.kind)))
    };

    let Some(source) = current else {
        return match (op.kind, &op.location) {
            (EditKind::Insert, Location::Start | Location::End) => Ok(content()?.to_owned()),
            _ => Err(AppError::MalformedEdit(format!(
                "file does not exist; cannot {:?} at {}",
                op.kind, op.location
            ))),
        };
    };

    let range = locate(source, &op.location)?.ok_or_else(|| {
        AppError::MalformedEdit(format!("{} not found", op.location))
    })?;

    match op.kind {
        EditKind::Insert => {
            let at = range.end;
            let insert = content()?;
            let mut next = String::with_capacity(source.len() + insert.len() + 1);
            next.push_str(&source[..at]);
            if op.location == Location::End && !source.is_empty() && !source.ends_with('\n') {
                next.push('\n');
            }
            next.push_str(insert);
            next.push_str(&source[at..]);
            Ok(next)
        }
        EditKind::Replace | EditKind::Delete => {
            if range.is_empty() {
                return Err(AppError::MalformedEdit(format!(
                    "{:?} needs a symbol or anchor, not {}",
                    op.kind, op.location
                )));
            }
            let replacement = if op.kind == EditKind::Replace {
                content()?
            } else {
                ""
            };
            let mut next = String::with_capacity(source.len() + replacement.len());
            next.push_str(&source[..range.start]);
            next.push_str(replacement);
            next.push_str(&source[range.end..]);
            Ok(next)
        }
    }
}
