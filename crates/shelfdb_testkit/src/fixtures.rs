//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and common test scenarios.

use shelfdb_codec::Object;
use shelfdb_core::{Config, PropertyList, StoragePolicy, Store};
use shelfdb_storage::{InMemoryBackend, StorageBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Class used by the fixtures.
pub const PLANET: &str = "Planet";

/// A `Planet` object with a `name` property.
pub fn planet(id: &str, name: &str) -> Object {
    Object::new(PLANET, id).with("name", name)
}

/// Registers the `Planet` class with `policy`.
pub fn register_planets(store: &Store, policy: StoragePolicy) {
    store.register_class(PLANET, policy, PropertyList::new(["name"]));
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Store,
    /// The in-memory backend, for stores that have one.
    pub memory: Option<Arc<InMemoryBackend>>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// Creates a new in-memory test store with a custom configuration.
    pub fn memory_with(config: Config) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let store = Store::with_backend(Arc::clone(&backend) as Arc<dyn StorageBackend>, config)
            .expect("Failed to open in-memory store");
        Self {
            store,
            memory: Some(backend),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test store.
    pub fn file() -> Self {
        Self::file_with(Config::default())
    }

    /// Creates a new file-based test store with a custom configuration.
    pub fn file_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::open(&temp_dir.path().join("store"), config)
            .expect("Failed to open file store");
        Self {
            store,
            memory: None,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("store"))
    }

    /// Closes the store and opens the same directory again, keeping the
    /// temporary directory alive. Registered classes must be registered again.
    pub fn reopen(self, config: Config) -> Self {
        let Self {
            store,
            memory,
            temp_dir,
        } = self;
        let reopened = match (&memory, &temp_dir) {
            (Some(backend), _) => {
                Store::with_backend(Arc::clone(backend) as Arc<dyn StorageBackend>, config)
            }
            (None, Some(dir)) => {
                drop(store);
                Store::open(&dir.path().join("store"), config)
            }
            (None, None) => unreachable!("test store without storage"),
        }
        .expect("Failed to reopen store");
        Self {
            store: reopened,
            memory,
            temp_dir,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust,ignore
/// use shelfdb_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary file-based store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store.path().expect("File store should have a path");
    f(&test_store.store, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a store with `count` committed planets under `policy`.
    pub fn populated_store(policy: StoragePolicy, count: usize, config: Config) -> TestStore {
        let test_store = TestStore::memory_with(config);
        register_planets(&test_store, policy);
        test_store
            .transaction(|txn| {
                test_store.save_objects(
                    txn,
                    (0..count).map(|i| planet(&i.to_string(), &format!("planet-{i}"))),
                )
            })
            .expect("Failed to populate store");
        test_store
    }
}
