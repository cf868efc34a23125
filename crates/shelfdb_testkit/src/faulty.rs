//! Fault injection for commit-failure testing.
//!
//! A commit writes one file per touched resource. When a later write fails
//! the store has to put the files it already rewrote back the way they were.
//! [`FaultyBackend`] makes chosen writes fail so those paths can be driven
//! on purpose.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shelfdb_testkit::faulty::FaultyBackend;
//!
//! let backend = Arc::new(FaultyBackend::memory());
//! backend.fail_writes_to("Beta");
//! // ... commit a transaction touching Alpha then Beta
//! assert_eq!(backend.injected_failures(), 1);
//! ```

use parking_lot::Mutex;
use shelfdb_codec::{Object, ObjectId};
use shelfdb_core::{Config, CoreError, PropertyList, StoragePolicy, Store};
use shelfdb_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A storage backend wrapper that fails chosen writes.
pub struct FaultyBackend {
    inner: Arc<dyn StorageBackend>,
    failing_keys: Mutex<BTreeSet<String>>,
    fail_after_writes: AtomicUsize,
    writes: AtomicUsize,
    injected: AtomicUsize,
}

impl FaultyBackend {
    /// Wraps an inner backend.
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            failing_keys: Mutex::new(BTreeSet::new()),
            fail_after_writes: AtomicUsize::new(usize::MAX),
            writes: AtomicUsize::new(0),
            injected: AtomicUsize::new(0),
        }
    }

    /// Wraps a fresh in-memory backend.
    pub fn memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    /// Makes every write and remove of `key` fail.
    pub fn fail_writes_to(&self, key: impl Into<String>) {
        self.failing_keys.lock().insert(key.into());
    }

    /// Makes every write fail once `count` more writes have succeeded.
    pub fn fail_after(&self, count: usize) {
        let done = self.writes.load(Ordering::SeqCst);
        self.fail_after_writes
            .store(done.saturating_add(count), Ordering::SeqCst);
    }

    /// Clears every injected fault.
    pub fn reset(&self) {
        self.failing_keys.lock().clear();
        self.fail_after_writes.store(usize::MAX, Ordering::SeqCst);
    }

    /// Number of writes and removes that reached the inner backend.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of operations failed on purpose.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> StorageResult<()> {
        let over_budget = self.writes.load(Ordering::SeqCst) >= self.fail_after_writes.load(Ordering::SeqCst);
        if over_budget || self.failing_keys.lock().contains(key) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::unavailable(format!("injected failure writing {key}")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl StorageBackend for FaultyBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.check(key)?;
        self.inner.write(key, data)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.check(key)?;
        self.inner.remove(key)
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys()
    }
}

impl std::fmt::Debug for FaultyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyBackend")
            .field("failing_keys", &*self.failing_keys.lock())
            .field("writes", &self.writes())
            .field("injected", &self.injected_failures())
            .finish_non_exhaustive()
    }
}

/// Result of a commit-failure scenario.
#[derive(Debug, Clone)]
pub struct FaultResult {
    /// Whether the scenario passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Any error message.
    pub error: Option<String>,
}

impl FaultResult {
    /// Creates a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, error: impl Into<String>) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            error: Some(error.into()),
        }
    }
}

/// Runs the two-resource commit-failure scenario: a transaction changes
/// class `Alpha` then class `Beta`, and the write of `Beta` fails.
///
/// Passes if the commit reports a storage failure, `Alpha` is back to its
/// committed value both on storage and in a new transaction, and new
/// transactions are accepted again.
pub fn run_compensation_scenario(policy: StoragePolicy) -> FaultResult {
    const DESCRIPTION: &str = "failed commit restores earlier resources";
    let backend = Arc::new(FaultyBackend::memory());
    let outcome = (|| -> Result<Option<String>, CoreError> {
        let store = Store::with_backend(
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
            Config::default(),
        )?;
        store.register_class("Alpha", policy, PropertyList::any());
        store.register_class("Beta", StoragePolicy::ClassFile, PropertyList::any());

        let a = ObjectId::new("a");
        let b = ObjectId::new("b");
        store.transaction(|txn| {
            store.save_object(txn, Object::new("Alpha", a.clone()).with("v", 1i64))?;
            store.save_object(txn, Object::new("Beta", b.clone()).with("v", 1i64))
        })?;
        let alpha_files = snapshot(&backend, "Alpha")?;

        backend.fail_writes_to("Beta");
        let failed = store.transaction(|txn| {
            store.update_object(txn, Object::new("Alpha", a.clone()).with("v", 2i64))?;
            store.update_object(txn, Object::new("Beta", b.clone()).with("v", 2i64))
        });
        match failed {
            Err(e) if e.is_storage_failure() => {}
            other => return Ok(Some(format!("expected a storage failure, got {other:?}"))),
        }
        backend.reset();

        if snapshot(&backend, "Alpha")? != alpha_files {
            return Ok(Some("Alpha files differ from their committed state".into()));
        }
        let alpha = store.transaction(|txn| store.load_object(txn, "Alpha", &a))?;
        if alpha.get("v").and_then(|v| v.as_i64()) != Some(1) {
            return Ok(Some(format!("Alpha reads {alpha:?} after compensation")));
        }
        Ok(None)
    })();

    match outcome {
        Ok(None) => FaultResult::pass(DESCRIPTION),
        Ok(Some(problem)) => FaultResult::fail(DESCRIPTION, problem),
        Err(e) => FaultResult::fail(DESCRIPTION, e.to_string()),
    }
}

/// Every stored key starting with `class` and its bytes.
fn snapshot(backend: &FaultyBackend, class: &str) -> Result<Vec<(String, Vec<u8>)>, CoreError> {
    let mut files = Vec::new();
    for key in backend.keys()? {
        if key.starts_with(class) {
            if let Some(bytes) = backend.read(&key)? {
                files.push((key, bytes));
            }
        }
    }
    Ok(files)
}
