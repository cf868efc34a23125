//! File-backed resource.

use super::{CommittedResourceRecord, TransactionalResource};
use crate::cache::RecordCache;
use crate::error::{CoreError, CoreResult};
use crate::trigger::TriggerManager;
use crate::types::{ResourceId, Timestamp, TxnContext};
use parking_lot::Mutex;
use shelfdb_codec::{Object, ObjectCodec, ObjectId, ObjectRef};
use shelfdb_storage::StorageBackend;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error};

/// What a resource file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Full objects; commits notify triggers.
    Objects,
    /// Bare `(class, id)` references, cached as property-less objects.
    References,
}

#[derive(Debug)]
struct ResourceInner {
    pins: usize,
    loaded: bool,
    cache: RecordCache,
    /// Stamps handed over from an evicted copy, applied on load.
    stamps: HashMap<ObjectId, Timestamp>,
}

/// One backing file and its record cache.
///
/// The file is read lazily by the first `prepare`. Commits rewrite the whole
/// file from the resulting object set; a set that ends up empty removes the
/// file instead.
pub struct Resource {
    id: ResourceId,
    kind: ResourceKind,
    backend: Arc<dyn StorageBackend>,
    codec: Arc<dyn ObjectCodec>,
    triggers: Option<Arc<TriggerManager>>,
    inner: Mutex<ResourceInner>,
}

impl Resource {
    /// Creates an unloaded resource.
    pub fn new(
        id: ResourceId,
        kind: ResourceKind,
        backend: Arc<dyn StorageBackend>,
        codec: Arc<dyn ObjectCodec>,
        triggers: Option<Arc<TriggerManager>>,
    ) -> Self {
        let cache = RecordCache::new(id.clone());
        Self {
            id,
            kind,
            backend,
            codec,
            triggers,
            inner: Mutex::new(ResourceInner {
                pins: 0,
                loaded: false,
                cache,
                stamps: HashMap::new(),
            }),
        }
    }

    /// Seeds the commit stamps of records committed by an earlier copy of
    /// this resource, so a reload keeps refusing stale writers.
    #[must_use]
    pub fn with_commit_stamps(self, stamps: HashMap<ObjectId, Timestamp>) -> Self {
        self.inner.lock().stamps = stamps;
        self
    }

    /// Commit stamps of the committed records.
    #[must_use]
    pub fn commit_stamps(&self) -> HashMap<ObjectId, Timestamp> {
        self.inner.lock().cache.commit_stamps()
    }

    /// What the file holds.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Pins the resource, loading the file if this is the first use.
    /// Returns true if this call loaded the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded; the pin is
    /// not taken in that case.
    pub fn prepare_and_load(&self, _txn: TxnContext) -> CoreResult<bool> {
        let mut inner = self.inner.lock();
        if inner.loaded {
            inner.pins += 1;
            return Ok(false);
        }

        let objects = self.load()?;
        debug!(resource = %self.id, objects = objects.len(), "loaded resource");
        let stamps = std::mem::take(&mut inner.stamps);
        inner.cache.load_stamped(objects, &stamps);
        inner.loaded = true;
        inner.pins += 1;
        Ok(true)
    }

    fn load(&self) -> CoreResult<Vec<Object>> {
        let Some(bytes) = self.backend.read(self.id.as_str())? else {
            return Ok(Vec::new());
        };
        let objects = match self.kind {
            ResourceKind::Objects => self.codec.decode(&bytes)?,
            ResourceKind::References => self
                .codec
                .decode_references(&bytes)?
                .into_iter()
                .map(|r| Object::new(r.class, r.id))
                .collect(),
        };
        Ok(objects)
    }

    /// Rewrites the backing file with `objects`, or removes it if empty.
    fn persist(&self, objects: &[Object]) -> CoreResult<()> {
        let key = self.id.as_str();
        let io_failure = |source| CoreError::StorageIOFailure {
            resource: self.id.to_string(),
            source,
        };

        if objects.is_empty() {
            return self.backend.remove(key).map_err(io_failure);
        }
        let bytes = match self.kind {
            ResourceKind::Objects => self.codec.encode(objects)?,
            ResourceKind::References => {
                let refs: Vec<ObjectRef> = objects.iter().map(Object::to_ref).collect();
                self.codec.encode_references(&refs)?
            }
        };
        self.backend.write(key, &bytes).map_err(io_failure)
    }

    /// The value of `id` visible to `txn`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadNotFound`] if nothing is visible.
    pub fn read(&self, id: &ObjectId, txn: TxnContext) -> CoreResult<Object> {
        self.inner.lock().cache.read(id, txn)
    }

    /// Every value visible to `txn`.
    #[must_use]
    pub fn read_all(&self, txn: TxnContext) -> BTreeMap<ObjectId, Object> {
        self.inner.lock().cache.read_all(txn)
    }

    /// Returns true if `id` is visible to `txn`.
    #[must_use]
    pub fn contains(&self, id: &ObjectId, txn: TxnContext) -> bool {
        self.inner.lock().cache.contains(id, txn)
    }

    /// Stages an insert.
    ///
    /// # Errors
    ///
    /// See [`RecordCache::insert`].
    pub fn insert(&self, object: Object, txn: TxnContext) -> CoreResult<()> {
        self.inner.lock().cache.insert(object, txn)
    }

    /// Stages an update.
    ///
    /// # Errors
    ///
    /// See [`RecordCache::update`].
    pub fn update(&self, object: Object, txn: TxnContext) -> CoreResult<()> {
        self.inner.lock().cache.update(object, txn)
    }

    /// Stages a delete.
    ///
    /// # Errors
    ///
    /// See [`RecordCache::delete`].
    pub fn delete(&self, id: &ObjectId, txn: TxnContext) -> CoreResult<()> {
        self.inner.lock().cache.delete(id, txn)
    }

    /// Committed objects, ignoring pending changes.
    #[must_use]
    pub fn committed(&self) -> Vec<Object> {
        self.inner.lock().cache.committed()
    }

    /// Returns true if `txn` has pending changes here.
    #[must_use]
    pub fn has_changes(&self, txn: TxnContext) -> bool {
        self.inner.lock().cache.has_changes(txn.id)
    }
}

impl TransactionalResource for Resource {
    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn prepare(&self, txn: TxnContext) -> CoreResult<()> {
        self.prepare_and_load(txn).map(|_| ())
    }

    fn commit(&self, txn: TxnContext, stamp: Timestamp) -> CoreResult<CommittedResourceRecord> {
        let mut inner = self.inner.lock();
        if !inner.cache.has_changes(txn.id) {
            inner.pins = inner.pins.saturating_sub(1);
            return Ok(CommittedResourceRecord::empty(self.id.clone()));
        }

        let objects: Vec<Object> = inner.cache.read_all(txn).into_values().collect();
        if let Err(e) = self.persist(&objects) {
            // The old file may already be gone; put the committed state back.
            if let Err(restore) = self.persist(&inner.cache.committed()) {
                error!(resource = %self.id, error = %restore, "could not restore file after failed write");
            }
            return Err(e);
        }

        let changes = inner.cache.commit(txn.id, stamp);
        inner.pins = inner.pins.saturating_sub(1);
        debug!(resource = %self.id, %stamp, changes = changes.len(), "committed resource");

        if self.kind == ResourceKind::Objects {
            if let Some(triggers) = &self.triggers {
                for change in &changes {
                    if let Some(subject) = &change.subject {
                        triggers.notify(change.kind, subject);
                    }
                }
            }
        }

        Ok(CommittedResourceRecord {
            resource: self.id.clone(),
            changes,
        })
    }

    fn rollback(&self, txn: TxnContext) {
        let mut inner = self.inner.lock();
        inner.cache.rollback(txn.id);
        inner.pins = inner.pins.saturating_sub(1);
    }

    fn rollback_failed_commit(
        &self,
        _txn: TxnContext,
        record: &CommittedResourceRecord,
    ) -> CoreResult<()> {
        if record.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        inner.cache.restore(&record.changes);
        debug!(resource = %self.id, changes = record.changes.len(), "reverted committed resource");
        self.persist(&inner.cache.committed())
    }

    fn pins(&self) -> usize {
        self.inner.lock().pins
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
