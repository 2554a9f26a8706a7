//! `git` command-line adapter.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures_util::future::BoxFuture;
use tokio::process::Command;
use tracing::debug;

use super::VersionControl;
use crate::models::{EditSet, Revision};
use crate::{AppError, Result};

/// Repository driven through the `git` binary on `PATH`.
#[derive(Debug, Clone)]
pub struct GitRepository {
    root: PathBuf,
}

impl GitRepository {
    /// Adapter for the repository at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Repository root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| AppError::Vcs(format!("failed to run git: {err}")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(AppError::Vcs(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )))
        }
    }
}

impl VersionControl for GitRepository {
    fn current_revision(&self) -> BoxFuture<'_, Result<Revision>> {
        Box::pin(async move { self.git(&["rev-parse", "HEAD"]).await.map(Revision::new) })
    }

    fn commit<'a>(
        &'a self,
        edit_set: &'a EditSet,
        message: &'a str,
    ) -> BoxFuture<'a, Result<Revision>> {
        Box::pin(async move {
            let mut add = vec!["add", "--"];
            add.extend(edit_set.paths());
            self.git(&add).await?;

            let author = format!("{} <{}@steward.local>", edit_set.agent, edit_set.agent);
            let mut commit = vec![
                "commit",
                "--no-verify",
                "--author",
                author.as_str(),
                "-m",
                message,
                "--only",
                "--",
            ];
            commit.extend(edit_set.paths());
            if let Err(err) = self.git(&commit).await {
                let mut reset = vec!["reset", "--quiet", "--"];
                reset.extend(edit_set.paths());
                let _ = self.git(&reset).await;
                return Err(err);
            }

            let revision = self.git(&["rev-parse", "HEAD"]).await?;
            debug!(revision, files = edit_set.files.len(), "git commit created");
            Ok(Revision::new(revision))
        })
    }
}
