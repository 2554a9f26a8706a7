//! Atomic file writing.
//!
//! Content is written to a temporary file in the target's directory and
//! renamed over the target with `tempfile::NamedTempFile::persist()`, so a
//! reader never observes a partially written file.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Atomically replace `path` with `content`, creating parent directories.
///
/// `path` must already be validated against the workspace root.
///
/// # Errors
///
/// Returns `AppError::Io` on directory creation, temp file write, or rename failure.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.display())))?;

    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directories for {}: {err}",
            path.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;

    tmp.write_all(content.as_bytes())
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    tmp.persist(path)
        .map_err(|err| AppError::Io(format!("failed to persist {}: {err}", path.display())))?;

    Ok(())
}

/// Restore `path` to `original`: rewrite it, or remove it when it did not exist.
///
/// # Errors
///
/// Returns `AppError::Io` if the write or removal fails.
pub fn restore(path: &Path, original: Option<&str>) -> Result<()> {
    match original {
        Some(content) => write_atomic(path, content),
        None => match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Io(format!(
                "failed to remove {}: {err}",
                path.display()
            ))),
        },
    }
}
