//! Validation runner: executes the check suite against a disposable copy.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::process::Command;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::CheckConfig;
use crate::models::{EditSet, ValidationResult};
use crate::workspace::{DisposableCopy, Workspace};
use crate::{AppError, Result};

const DIAGNOSTIC_TAIL_BYTES: usize = 4096;

/// Validation boundary: runs checks inside a prepared working copy.
///
/// Implementations must be deterministic for a given tree and report
/// failing check identifiers in a stable order.
pub trait CheckRunner: Send + Sync {
    /// Run every check against `working_copy`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` only if the suite cannot run at all;
    /// failing checks are reported through the result.
    fn run_checks<'a>(&'a self, working_copy: &'a Path) -> BoxFuture<'a, Result<ValidationResult>>;
}

/// Prepares disposable copies and hands them to a [`CheckRunner`].
#[derive(Clone)]
pub struct ValidationRunner {
    workspace: Workspace,
    checks: Arc<dyn CheckRunner>,
}

impl ValidationRunner {
    /// Runner copying from `workspace` and executing `checks`.
    #[must_use]
    pub fn new(workspace: Workspace, checks: Arc<dyn CheckRunner>) -> Self {
        Self { workspace, checks }
    }

    /// Validate `edit_set` in a fresh copy of the workspace.
    ///
    /// The copy is removed before returning; the live tree is never written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the copy cannot be prepared, or the check
    /// runner's error.
    pub async fn validate(&self, edit_set: &EditSet) -> Result<ValidationResult> {
        let span = info_span!("validate", message_id = %edit_set.origin_message, agent = %edit_set.agent);
        async {
            let root = self.workspace.root().to_path_buf();
            let files = edit_set.clone();
            let copy = tokio::task::spawn_blocking(move || DisposableCopy::create(&root, &files))
                .await
                .map_err(|err| AppError::Io(format!("working copy task failed: {err}")))??;

            let result = self.checks.run_checks(copy.path()).await;

            match tokio::task::spawn_blocking(move || copy.discard()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(%err, "failed to remove working copy"),
                Err(err) => warn!(%err, "working copy cleanup task failed"),
            }

            let result = result?;
            info!(
                passed = result.passed,
                failing = ?result.failing_checks,
                "validation finished"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

/// Runs configured commands in order; every failing command is reported.
#[derive(Debug, Clone)]
pub struct CommandChecks {
    checks: Vec<CheckConfig>,
}

impl CommandChecks {
    /// Suite of `checks`.
    #[must_use]
    pub fn new(checks: Vec<CheckConfig>) -> Self {
        Self { checks }
    }

    async fn run_one(check: &CheckConfig, working_copy: &Path) -> std::result::Result<(), String> {
        let mut command = Command::new(&check.command);
        command
            .args(&check.args)
            .current_dir(working_copy)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout = Duration::from_secs(check.timeout_s);
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(format!("failed to start `{}`: {err}", check.command)),
            Err(_) => return Err(format!("timed out after {}s", check.timeout_s)),
        };

        if output.status.success() {
            return Ok(());
        }

        let mut detail = output.status.to_string();
        for stream in [&output.stderr, &output.stdout] {
            let text = String::from_utf8_lossy(stream);
            let tail = tail(text.trim(), DIAGNOSTIC_TAIL_BYTES);
            if !tail.is_empty() {
                detail.push('\n');
                detail.push_str(tail);
            }
        }
        Err(detail)
    }
}

impl CheckRunner for CommandChecks {
    fn run_checks<'a>(&'a self, working_copy: &'a Path) -> BoxFuture<'a, Result<ValidationResult>> {
        Box::pin(async move {
            if self.checks.is_empty() {
                return Ok(ValidationResult::pass("no checks configured"));
            }

            let mut failing = Vec::new();
            let mut diagnostics = String::new();
            for check in &self.checks {
                debug!(check = %check.id, "running check");
                match Self::run_one(check, working_copy).await {
                    Ok(()) => diagnostics.push_str(&format!("[{}] ok\n", check.id)),
                    Err(detail) => {
                        diagnostics.push_str(&format!("[{}] failed: {detail}\n", check.id));
                        failing.push(check.id.clone());
                    }
                }
            }

            Ok(if failing.is_empty() {
                ValidationResult::pass(diagnostics)
            } else {
                ValidationResult::fail(failing, diagnostics)
            })
        })
    }
}

/// Last `max` bytes of `text`, cut on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
