//! Path validation and symlink-escape detection.
//!
//! Every target path named by a change descriptor is relative to the
//! workspace root. Absolute paths, `..` traversal above the root and
//! symlinks that resolve outside it are rejected.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Directories never read, copied or written through a descriptor.
pub const RESERVED_DIRS: &[&str] = &[".git", ".steward", "target"];

/// Validate that the workspace-relative `candidate` resides within `workspace_root`.
///
/// Returns the resolved absolute path on success.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if:
/// - The workspace root cannot be canonicalized.
/// - The candidate is empty or absolute.
/// - The candidate contains `..` segments that escape the root.
/// - The candidate enters a reserved directory such as `.git`.
/// - The resolved path is a symlink whose target escapes the workspace.
pub fn validate_path(workspace_root: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let candidate = candidate.as_ref();
    let root = workspace_root
        .canonicalize()
        .map_err(|err| AppError::PathViolation(format!("workspace root invalid: {err}")))?;

    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::PathViolation(format!(
                        "{} attempts to escape workspace",
                        candidate.display()
                    )));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::PathViolation(format!(
                    "{} must be relative to the workspace",
                    candidate.display()
                )));
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    let first = normalized.components().next().ok_or_else(|| {
        AppError::PathViolation(format!("{} does not name a file", candidate.display()))
    })?;
    if RESERVED_DIRS
        .iter()
        .any(|dir| first.as_os_str() == std::ffi::OsStr::new(dir))
    {
        return Err(AppError::PathViolation(format!(
            "{} is inside a reserved directory",
            candidate.display()
        )));
    }

    let absolute = root.join(normalized);

    // If the path exists, canonicalize resolves symlinks and the final
    // target must still be within the root.
    if absolute.exists() {
        let canonical = absolute
            .canonicalize()
            .map_err(|err| AppError::PathViolation(format!("cannot resolve path: {err}")))?;

        if !canonical.starts_with(&root) {
            return Err(AppError::PathViolation(format!(
                "{} is a symlink escaping the workspace",
                candidate.display()
            )));
        }

        Ok(canonical)
    } else {
        Ok(absolute)
    }
}
