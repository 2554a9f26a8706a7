//! Disposable working copies for validation.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use super::path_safety::{validate_path, RESERVED_DIRS};
use super::writer::write_atomic;
use crate::models::EditSet;
use crate::{AppError, Result};

/// Throwaway copy of the workspace with an edit set applied.
///
/// The directory is removed when the copy is dropped; the live workspace
/// is never touched.
#[derive(Debug)]
pub struct DisposableCopy {
    dir: TempDir,
}

impl DisposableCopy {
    /// Copy `workspace_root` (minus reserved directories) into a fresh
    /// temporary directory and write the edit set's files into it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if copying fails or `AppError::PathViolation`
    /// if an edit set path escapes the copy.
    pub fn create(workspace_root: &Path, edit_set: &EditSet) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("steward-validate-")
            .tempdir()
            .map_err(|err| AppError::Io(format!("failed to create working copy: {err}")))?;

        copy_tree(workspace_root, dir.path(), true)?;

        for (path, content) in &edit_set.files {
            let target = validate_path(dir.path(), path)?;
            write_atomic(&target, content)?;
        }

        debug!(
            copy = %dir.path().display(),
            files = edit_set.files.len(),
            "working copy prepared"
        );
        Ok(Self { dir })
    }

    /// Root of the working copy.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the working copy now.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be removed.
    pub fn discard(self) -> Result<()> {
        let path: PathBuf = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|err| AppError::Io(format!("failed to remove {}: {err}", path.display())))
    }
}

/// Reserved directories are skipped only at the workspace root.
fn copy_tree(from: &Path, to: &Path, at_root: bool) -> Result<()> {
    let entries = fs::read_dir(from)
        .map_err(|err| AppError::Io(format!("cannot read {}: {err}", from.display())))?;

    for entry in entries {
        let entry = entry.map_err(|err| AppError::Io(format!("cannot read entry: {err}")))?;
        let name = entry.file_name();
        if at_root && RESERVED_DIRS.iter().any(|dir| name == *dir) {
            continue;
        }

        let source = entry.path();
        let dest = to.join(&name);
        let file_type = entry
            .file_type()
            .map_err(|err| AppError::Io(format!("cannot stat {}: {err}", source.display())))?;

        if file_type.is_dir() {
            fs::create_dir_all(&dest)
                .map_err(|err| AppError::Io(format!("cannot create {}: {err}", dest.display())))?;
            copy_tree(&source, &dest, false)?;
        } else if file_type.is_file() {
            fs::copy(&source, &dest).map_err(|err| {
                AppError::Io(format!("cannot copy {}: {err}", source.display()))
            })?;
        }
        // Symlinks are skipped; checks run against regular files only.
    }
    Ok(())
}
