//! Workspace file access: path safety, fingerprints, atomic writes and
//! disposable working copies.

pub mod copy;
pub mod path_safety;
pub mod writer;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::{AppError, Result};

pub use copy::DisposableCopy;
pub use path_safety::validate_path;
pub use writer::{restore, write_atomic};

/// Handle to the live workspace the agents edit.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Wrap a canonical workspace root.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Workspace root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` if the path escapes the workspace.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        validate_path(&self.root, relative)
    }

    /// Read a workspace-relative file; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` or `AppError::Io`.
    pub fn read(&self, relative: &str) -> Result<Option<String>> {
        let path = self.resolve(relative)?;
        read_optional(&path)
    }
}

/// Read a file, mapping "not found" to `None`.
///
/// # Errors
///
/// Returns `AppError::Io` for any other read failure.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::Io(format!(
            "failed to read {}: {err}",
            path.display()
        ))),
    }
}

/// SHA-256 hex digest of `data`.
#[must_use]
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of optional file content.
#[must_use]
pub fn fingerprint_of(content: Option<&str>) -> Option<String> {
    content.map(|c| fingerprint(c.as_bytes()))
}
