//! On-disk copies of the last downloaded bulletin and signature.
//!
//! Layout: `<dir>/alert<channel>` and `<dir>/alert<channel>.sig`, holding
//! the bytes exactly as received.

use crate::state::Channel;
use crate::util::atomic_write::{AtomicWriteError, write_atomically};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cannot create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cannot write cache file: {0}")]
    Write(#[from] AtomicWriteError),
    #[error("Cannot remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct AlertCache {
    dir: PathBuf,
}

impl AlertCache {
    /// Open the cache, creating its directory if needed.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir).map_err(|source| CacheError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(AlertCache {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn content_path(&self, channel: &Channel) -> PathBuf {
        self.dir.join(channel.file_name())
    }

    pub fn signature_path(&self, channel: &Channel) -> PathBuf {
        self.dir.join(channel.signature_file_name())
    }

    pub fn write_signature(&self, channel: &Channel, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.signature_path(channel);
        debug!("Writing {} bytes to {}", bytes.len(), path.display());
        write_atomically(&path, bytes)?;
        Ok(())
    }

    pub fn write_content(&self, channel: &Channel, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.content_path(channel);
        debug!("Writing {} bytes to {}", bytes.len(), path.display());
        write_atomically(&path, bytes)?;
        Ok(())
    }

    pub fn read_content(&self, channel: &Channel) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.content_path(channel))
    }

    pub fn has_pair(&self, channel: &Channel) -> bool {
        self.content_path(channel).is_file() && self.signature_path(channel).is_file()
    }

    /// Remove both files of `channel`. Already-absent files are fine.
    pub fn purge(&self, channel: &Channel) -> Result<(), CacheError> {
        let mut first_error = None;
        for path in [self.content_path(channel), self.signature_path(channel)] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    warn!("Failed to remove {}: {source}", path.display());
                    first_error.get_or_insert(CacheError::Remove { path, source });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn open_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a").join("b");

        let cache = AlertCache::open(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(cache.dir(), dir);
    }

    #[cfg(unix)]
    #[test]
    fn open_fails_when_parent_is_a_file() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let result = AlertCache::open(&blocker.join("cache"));

        assert!(matches!(result, Err(CacheError::CreateDir { .. })));
    }

    #[test]
    fn write_and_purge_pair() {
        let temp = TempDir::new().unwrap();
        let cache = AlertCache::open(temp.path()).unwrap();
        let channel = Channel::new("23");

        cache.write_signature(&channel, b"sig").unwrap();
        assert!(!cache.has_pair(&channel));
        cache.write_content(&channel, b"body").unwrap();
        assert!(cache.has_pair(&channel));

        assert_eq!(fs::read(temp.path().join("alert23.sig")).unwrap(), b"sig");
        assert_eq!(cache.read_content(&channel).unwrap(), b"body");

        cache.purge(&channel).unwrap();
        assert!(!temp.path().join("alert23").exists());
        assert!(!temp.path().join("alert23.sig").exists());
    }

    #[test]
    fn purge_of_missing_files_is_ok() {
        let temp = TempDir::new().unwrap();
        let cache = AlertCache::open(temp.path()).unwrap();

        cache.purge(&Channel::default_channel()).unwrap();
    }

    #[test]
    fn purge_removes_signature_even_if_content_cannot_be_removed() {
        let temp = TempDir::new().unwrap();
        let cache = AlertCache::open(temp.path()).unwrap();
        let channel = Channel::new("23");
        std::fs::create_dir(cache.content_path(&channel)).unwrap();
        cache.write_signature(&channel, b"sig").unwrap();

        let err = cache.purge(&channel).unwrap_err();

        assert!(matches!(err, CacheError::Remove { ref path, .. } if *path == cache.content_path(&channel)));
        assert!(!cache.signature_path(&channel).exists());
    }

    #[test]
    fn channels_do_not_share_files() {
        let temp = TempDir::new().unwrap();
        let cache = AlertCache::open(temp.path()).unwrap();
        let a = Channel::new("a");
        let b = Channel::new("b");

        cache.write_signature(&a, b"a").unwrap();
        cache.write_content(&a, b"a").unwrap();
        cache.purge(&b).unwrap();

        assert!(cache.has_pair(&a));
    }
}
