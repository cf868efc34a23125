//! In-memory storage backend for testing.

use crate::backend::{validate_key, StorageBackend};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An in-memory storage backend.
///
/// This backend keeps every file in a map and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// It counts reads, writes and removals so tests can assert that an operation
/// performed no I/O.
///
/// # Example
///
/// ```rust
/// use shelfdb_storage::{StorageBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write("a/b", b"data").unwrap();
/// assert!(backend.exists("a/b").unwrap());
/// assert_eq!(backend.keys().unwrap(), vec!["a/b".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    removes: AtomicUsize,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with files.
    ///
    /// Useful for testing load paths.
    #[must_use]
    pub fn with_files(files: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self {
            files: RwLock::new(files.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Returns a copy of the content under `key` without counting a read.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<Vec<u8>> {
        self.files.read().get(key).cloned()
    }

    /// Number of `read` calls served.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `write` calls served.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `remove` calls served.
    #[must_use]
    pub fn remove_count(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    /// Resets all operation counters to zero.
    pub fn reset_counters(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.removes.store(0, Ordering::SeqCst);
    }
}

impl StorageBackend for InMemoryBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.files.read().get(key).cloned())
    }

    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut files = self.files.write();
        files.remove(key);
        files.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.files.write().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.files.read().contains_key(key))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }
}
