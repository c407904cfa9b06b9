//! Durable whole-file replacement.
//!
//! Both the settings store and the alert cache rely on a write being either
//! fully visible or not visible at all after a crash, so every write goes
//! through a sibling temporary file that is fsynced and renamed into place.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum AtomicWriteError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
}

impl AtomicWriteError {
    fn from_io(path: &Path, e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::PermissionDenied {
            AtomicWriteError::PermissionDenied(path.to_path_buf())
        } else {
            AtomicWriteError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    }
}

/// Replace `path` with `contents`.
///
/// Writes to a temporary file in the same directory, fsyncs it, then
/// atomically renames it into place. The parent directory must exist.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), AtomicWriteError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| AtomicWriteError::from_io(parent, e))?;

    temp_file
        .write_all(contents)
        .map_err(|e| AtomicWriteError::from_io(path, e))?;

    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| AtomicWriteError::from_io(path, e))?;

    temp_file
        .persist(path)
        .map_err(|e| AtomicWriteError::from_io(path, e.error))?;

    Ok(())
}
