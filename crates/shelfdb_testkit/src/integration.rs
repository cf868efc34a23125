//! Cross-crate integration test helpers.
//!
//! Provides a harness that mirrors every committed change in a model map
//! and checks the store against it.

use crate::fixtures::{planet, register_planets, PLANET};
use crate::generators::ObjectOperation;
use shelfdb_codec::{Object, ObjectId};
use shelfdb_core::{CoreError, StoragePolicy, Store};
use std::collections::BTreeMap;

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The store instance.
    pub store: Store,
    /// Expected committed contents of the `Planet` class.
    objects: BTreeMap<ObjectId, Object>,
}

impl IntegrationHarness {
    /// Creates a harness over an in-memory store with `Planet` registered
    /// under `policy`.
    pub fn new(policy: StoragePolicy) -> Self {
        let store = Store::open_in_memory().expect("Failed to open store");
        Self::with_store(store, policy)
    }

    /// Creates a harness over an existing store.
    pub fn with_store(store: Store, policy: StoragePolicy) -> Self {
        register_planets(&store, policy);
        Self {
            store,
            objects: BTreeMap::new(),
        }
    }

    /// Saves an object and tracks it for later verification.
    pub fn save(&mut self, object: Object) {
        self.store
            .transaction(|txn| self.store.save_object(txn, object.clone()))
            .expect("Failed to save object");
        self.objects.insert(object.id.clone(), object);
    }

    /// Replaces an object and updates tracking.
    pub fn update(&mut self, object: Object) {
        self.store
            .transaction(|txn| self.store.update_object(txn, object.clone()))
            .expect("Failed to update object");
        self.objects.insert(object.id.clone(), object);
    }

    /// Deletes an object and updates tracking.
    pub fn delete(&mut self, id: &ObjectId) {
        self.store
            .transaction(|txn| self.store.delete_object(txn, PLANET, id))
            .expect("Failed to delete object");
        self.objects.remove(id);
    }

    /// Loads an object and verifies it matches the tracked value.
    pub fn load_and_verify(&self, id: &ObjectId) -> Option<Object> {
        let loaded = match self
            .store
            .transaction(|txn| self.store.load_object(txn, PLANET, id))
        {
            Ok(object) => Some(object),
            Err(CoreError::ReadNotFound { .. }) => None,
            Err(e) => panic!("Failed to load {id}: {e}"),
        };
        assert_eq!(
            loaded.as_ref(),
            self.objects.get(id),
            "Object mismatch for {id}"
        );
        loaded
    }

    /// Applies a generated operation.
    ///
    /// Saves of tracked ids and updates or deletes of untracked ids must be
    /// refused with the matching conflict; everything else must succeed.
    pub fn apply(&mut self, operation: &ObjectOperation) {
        match operation {
            ObjectOperation::Save { id, name } => {
                let object = planet(id.as_str(), name);
                if self.objects.contains_key(id) {
                    let result = self
                        .store
                        .transaction(|txn| self.store.save_object(txn, object.clone()));
                    assert!(
                        matches!(result, Err(CoreError::InsertConflict { .. })),
                        "duplicate save of {id} returned {result:?}"
                    );
                } else {
                    self.save(object);
                }
            }
            ObjectOperation::Update { id, name } => {
                let object = planet(id.as_str(), name);
                if self.objects.contains_key(id) {
                    self.update(object);
                } else {
                    let result = self
                        .store
                        .transaction(|txn| self.store.update_object(txn, object.clone()));
                    assert!(
                        matches!(result, Err(CoreError::UpdateConflict { .. })),
                        "update of missing {id} returned {result:?}"
                    );
                }
            }
            ObjectOperation::Delete { id } => {
                if self.objects.contains_key(id) {
                    self.delete(id);
                } else {
                    let result = self
                        .store
                        .transaction(|txn| self.store.delete_object(txn, PLANET, id));
                    assert!(
                        matches!(result, Err(CoreError::DeleteConflict { .. })),
                        "delete of missing {id} returned {result:?}"
                    );
                }
            }
            ObjectOperation::Load { id } => {
                self.load_and_verify(id);
            }
        }
    }

    /// Verifies the class contents equal the tracked objects.
    pub fn verify_all(&self) {
        let loaded: BTreeMap<ObjectId, Object> = self
            .store
            .transaction(|txn| self.store.load_objects(txn, PLANET))
            .expect("Failed to load objects")
            .into_iter()
            .map(|object| (object.id.clone(), object))
            .collect();
        assert_eq!(loaded, self.objects, "Class contents differ from model");
    }

    /// Returns the count of tracked objects.
    pub fn tracked_count(&self) -> usize {
        self.objects.len()
    }
}

/// Transaction behavior checks reusable across policies.
pub mod transaction {
    use super::*;
    use shelfdb_core::ConflictReason;
    use std::sync::mpsc;

    /// Uncommitted changes stay invisible to other transactions; once
    /// committed, a re-read sees them and an overwrite from the older
    /// transaction is refused as stale.
    pub fn test_uncommitted_isolation(store: &Store) {
        let id = ObjectId::from("isolation");
        store
            .transaction(|txn| store.save_object(txn, planet("isolation", "version1")))
            .expect("Failed to save initial object");

        let mut reader = store.begin().expect("Failed to begin reader");
        let (pending_tx, pending_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel::<()>();

        std::thread::scope(|scope| {
            let writer = scope.spawn(move || {
                let mut txn = store.begin().expect("Failed to begin writer");
                store
                    .update_object(&txn, planet("isolation", "version2"))
                    .expect("Failed to update");
                pending_tx.send(()).expect("Reader gone");
                go_rx.recv().expect("Reader gone");
                store.commit(&mut txn).expect("Failed to commit");
            });

            pending_rx.recv().expect("Writer gone");
            let during = store
                .load_object(&reader, PLANET, &id)
                .expect("Failed to read");
            assert_eq!(during.get("name").and_then(|v| v.as_str()), Some("version1"));
            go_tx.send(()).expect("Writer gone");
            writer.join().expect("Writer panicked");
        });

        let after = store
            .load_object(&reader, PLANET, &id)
            .expect("Failed to read");
        assert_eq!(after.get("name").and_then(|v| v.as_str()), Some("version2"));
        assert!(matches!(
            store.update_object(&reader, planet("isolation", "version3")),
            Err(CoreError::UpdateConflict {
                reason: ConflictReason::Stale,
                ..
            })
        ));
        store.rollback(&mut reader).expect("Failed to end reader");
    }

    /// A transaction that has not touched an object yet is still refused an
    /// overwrite of a commit made after it began.
    pub fn test_stale_write_without_prior_read(store: &Store) {
        store
            .transaction(|txn| store.save_object(txn, planet("stale", "version1")))
            .expect("Failed to save initial object");

        let mut older = store.begin().expect("Failed to begin older transaction");
        std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    store
                        .transaction(|txn| store.update_object(txn, planet("stale", "version2")))
                        .expect("Failed to update");
                })
                .join()
                .expect("Writer panicked");
        });

        assert!(matches!(
            store.update_object(&older, planet("stale", "version3")),
            Err(CoreError::UpdateConflict {
                reason: ConflictReason::Stale,
                ..
            })
        ));
        store.rollback(&mut older).expect("Failed to end older transaction");
    }

    /// A transaction that fails leaves no trace.
    pub fn test_transaction_abort(store: &Store) {
        let id = ObjectId::from("abort");
        store
            .transaction(|txn| store.save_object(txn, planet("abort", "original")))
            .expect("Failed to save initial object");

        let result: Result<(), CoreError> = store.transaction(|txn| {
            store.update_object(txn, planet("abort", "modified"))?;
            store.save_object(txn, planet("abort-new", "new"))?;
            Err(CoreError::invalid_operation("Simulated abort"))
        });
        assert!(result.is_err());

        let (kept, added) = store
            .transaction(|txn| {
                let kept = store.load_object(txn, PLANET, &id)?;
                let added = store.load_object(txn, PLANET, &ObjectId::from("abort-new"));
                Ok((kept, added))
            })
            .expect("Failed to read");
        assert_eq!(kept.get("name").and_then(|v| v.as_str()), Some("original"));
        assert!(matches!(added, Err(CoreError::ReadNotFound { .. })));
    }
}

/// Fragment index checks.
pub mod fragments {
    use super::*;

    /// Deletes and reinserts objects of a fragmented class and checks the
    /// index stays consistent with the fragment files.
    pub fn test_index_consistency(store: &Store) {
        for i in 0..10 {
            store
                .transaction(|txn| store.save_object(txn, planet(&i.to_string(), "p")))
                .expect("Failed to save");
        }
        for i in 0..5 {
            store
                .transaction(|txn| store.delete_object(txn, PLANET, &ObjectId::from(i as u64)))
                .expect("Failed to delete");
        }

        let remaining = store
            .transaction(|txn| store.load_objects(txn, PLANET))
            .expect("Failed to load");
        assert_eq!(remaining.len(), 5);

        let report = store.verify_fragments(PLANET).expect("Failed to verify");
        assert!(report.is_consistent(), "inconsistent fragments: {report:?}");
        assert_eq!(report.indexed, 5);
    }
}
