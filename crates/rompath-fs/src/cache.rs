//! Live queries against the local cache mirror.
//!
//! Nothing here is memoized: a fetch can land at any moment and a stale
//! answer right after it would be visible to the consumer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Existence and attributes of one cache path at the time of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub size: u64,
    pub is_dir: bool,
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

/// Thin wrapper over the cache directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Current state of `path`, `None` if it does not exist.
    pub fn entry(&self, path: &Path) -> Option<CacheEntry> {
        let metadata = fs::metadata(path).ok()?;
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        Some(CacheEntry {
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            created: metadata.created().unwrap_or(modified),
            accessed: metadata.accessed().unwrap_or(modified),
            modified,
        })
    }

    /// A regular file holding at least one byte.
    pub fn is_populated(&self, path: &Path) -> bool {
        rompath_fetch::is_populated(path)
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        self.entry(path).is_some_and(|e| e.is_dir)
    }

    /// Create `path` and its parents unless something already exists there.
    pub fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        if self.entry(path).is_some() {
            return Ok(());
        }
        fs::create_dir_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn entry_is_queried_live() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let file = dir.path().join("gameA.zip");

        assert!(store.entry(&file).is_none());
        fs::write(&file, b"PK\x03\x04").unwrap();

        let entry = store.entry(&file).unwrap();
        assert_eq!(entry.size, 4);
        assert!(!entry.is_dir);
        assert!(store.is_populated(&file));
    }

    #[test]
    fn ensure_dir_is_idempotent_and_keeps_files() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let nested = dir.path().join("a").join("b");

        store.ensure_dir(&nested).unwrap();
        store.ensure_dir(&nested).unwrap();
        assert!(store.is_dir(&nested));

        let file = dir.path().join("gameA.zip");
        fs::write(&file, b"x").unwrap();
        store.ensure_dir(&file).unwrap();
        assert!(file.is_file());
    }
}
