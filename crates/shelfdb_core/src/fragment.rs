//! Fragmentation index.
//!
//! A fragmented class spreads its objects over fragment files holding at most
//! `fragment_size` objects each. The index is itself a resource: one
//! `(objectId, fragmentId)` record per object. On top of the versioned
//! records it keeps two in-memory maps, `{id -> fragment}` and
//! `{fragment -> live count}`, used for placement. The maps are rebuilt from
//! the persisted records whenever the index is loaded.
//!
//! Lookups go through the versioned records so they obey the same snapshot
//! rules as any other read. A placement counts against its fragment as soon
//! as it is staged and is dropped again on rollback. A removal keeps its slot
//! until the delete commits, so a rolled-back delete never finds its slot
//! taken.

use crate::cache::ChangeKind;
use crate::error::{ConflictReason, CoreError, CoreResult};
use crate::resource::{CommittedResourceRecord, Resource, TransactionalResource};
use crate::resources::{fragment_prefix, index_resource_id, new_fragment_resource_id, ResourceManager};
use crate::transaction::Transaction;
use crate::types::{ResourceId, Timestamp, TransactionId, TxnContext};
use parking_lot::Mutex;
use shelfdb_codec::{Object, ObjectCodec, ObjectId, Value};
use shelfdb_storage::StorageBackend;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Class name of persisted index records.
pub const INDEX_RECORD_CLASS: &str = "FragmentIndexRecord";

const FRAGMENT_PROPERTY: &str = "fragment";

/// Persisted `(objectId, fragmentId)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// The indexed object.
    pub object_id: ObjectId,
    /// The fragment holding it.
    pub fragment: ResourceId,
}

impl IndexRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(object_id: ObjectId, fragment: ResourceId) -> Self {
        Self {
            object_id,
            fragment,
        }
    }

    /// Encodes the record as an object of the index resource.
    #[must_use]
    pub fn to_object(&self) -> Object {
        Object::new(INDEX_RECORD_CLASS, self.object_id.clone())
            .with(FRAGMENT_PROPERTY, self.fragment.as_str())
    }

    /// Decodes a record from an object of the index resource.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the fragment property is missing.
    pub fn from_object(object: &Object) -> CoreResult<Self> {
        match object.get(FRAGMENT_PROPERTY) {
            Some(Value::Text(fragment)) => Ok(Self::new(
                object.id.clone(),
                ResourceId::new(fragment.clone()),
            )),
            _ => Err(CoreError::schema(
                INDEX_RECORD_CLASS,
                format!("record {} has no fragment", object.id),
            )),
        }
    }
}

#[derive(Debug, Default)]
struct IndexMaps {
    by_object: HashMap<ObjectId, ResourceId>,
    live: HashMap<ResourceId, usize>,
}

impl IndexMaps {
    /// First fragment under capacity. Iteration order is unspecified.
    fn choose(&self, capacity: usize) -> Option<ResourceId> {
        self.live
            .iter()
            .find(|(_, count)| **count < capacity)
            .map(|(fragment, _)| fragment.clone())
    }

    fn place(&mut self, id: ObjectId, fragment: ResourceId) {
        *self.live.entry(fragment.clone()).or_insert(0) += 1;
        self.by_object.insert(id, fragment);
    }

    fn unplace(&mut self, id: &ObjectId, fragment: &ResourceId) {
        if self.by_object.get(id) == Some(fragment) {
            self.by_object.remove(id);
        }
        if let Some(count) = self.live.get_mut(fragment) {
            *count = count.saturating_sub(1);
        }
    }
}

#[derive(Debug)]
enum Pending {
    /// Staged placement; undone on rollback.
    Placed(ObjectId, ResourceId),
    /// Staged removal; applied on commit.
    Removed(ObjectId, ResourceId),
}

/// Object-to-fragment index of one fragmented class.
#[derive(Debug)]
pub struct FragmentIndex {
    class: String,
    records: Resource,
    fragment_size: usize,
    maps: Mutex<IndexMaps>,
    pending: Mutex<HashMap<TransactionId, Vec<Pending>>>,
}

impl FragmentIndex {
    /// Creates an index over `records`, the class's index resource.
    pub fn new(class: impl Into<String>, records: Resource, fragment_size: usize) -> Self {
        Self {
            class: class.into(),
            records,
            fragment_size: fragment_size.max(1),
            maps: Mutex::new(IndexMaps::default()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The indexed class.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Rebuilds the maps from the committed index records.
    fn rebuild(&self) -> CoreResult<()> {
        let mut maps = IndexMaps::default();
        for object in self.records.committed() {
            let record = IndexRecord::from_object(&object)?;
            maps.place(record.object_id, record.fragment);
        }
        debug!(
            class = %self.class,
            objects = maps.by_object.len(),
            fragments = maps.live.len(),
            "rebuilt fragment index"
        );
        *self.maps.lock() = maps;
        Ok(())
    }

    fn push(&self, txn: TransactionId, change: Pending) {
        self.pending.lock().entry(txn).or_default().push(change);
    }

    /// Reverses the map changes of the commit `record` describes.
    fn unapply(&self, record: &CommittedResourceRecord) {
        let decode = |object: Option<&Object>| object.and_then(|o| IndexRecord::from_object(o).ok());
        let mut maps = self.maps.lock();
        for change in record.changes.iter().rev() {
            match change.kind {
                ChangeKind::Insert => {
                    if let Some(placed) = decode(change.after.as_ref()) {
                        maps.unplace(&placed.object_id, &placed.fragment);
                    }
                }
                ChangeKind::Delete => {
                    if let Some(removed) = decode(change.before()) {
                        maps.place(removed.object_id, removed.fragment);
                    }
                }
                ChangeKind::Update => {}
            }
        }
    }

    /// Commit stamps of the index records.
    #[must_use]
    pub fn commit_stamps(&self) -> HashMap<ObjectId, Timestamp> {
        self.records.commit_stamps()
    }

    /// The fragment holding `id` as seen by `txn`.
    fn locate(&self, id: &ObjectId, ctx: TxnContext) -> Option<ResourceId> {
        self.records
            .read(id, ctx)
            .ok()
            .and_then(|record| IndexRecord::from_object(&record).ok())
            .map(|record| record.fragment)
    }

    /// Places `object` in a fragment under capacity, creating one if needed.
    /// Returns the chosen fragment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InsertConflict`] if the id is already indexed, or
    /// any error from loading the fragment.
    pub fn insert(
        &self,
        resources: &ResourceManager,
        txn: &Transaction,
        object: Object,
    ) -> CoreResult<ResourceId> {
        let ctx = txn.ctx();
        let id = object.id.clone();

        let fragment = {
            let mut maps = self.maps.lock();
            let fragment = maps
                .choose(self.fragment_size)
                .unwrap_or_else(|| new_fragment_resource_id(&self.class));
            self.records
                .insert(IndexRecord::new(id.clone(), fragment.clone()).to_object(), ctx)?;
            maps.place(id.clone(), fragment.clone());
            fragment
        };

        let placed = resources
            .lock_fragment_resource(txn, &fragment)
            .and_then(|resource| resource.insert(object, ctx));
        if let Err(e) = placed {
            if let Err(cleanup) = self.records.delete(&id, ctx) {
                warn!(class = %self.class, %id, error = %cleanup, "could not withdraw index record of failed insert");
            }
            self.maps.lock().unplace(&id, &fragment);
            return Err(e);
        }

        self.push(ctx.id, Pending::Placed(id, fragment.clone()));
        Ok(fragment)
    }

    /// Removes the object `id` from its fragment and from the index. The
    /// fragment slot is freed when the transaction commits.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DeleteConflict`] if the id is not indexed for this
    /// transaction, or the fragment's own delete conflict.
    pub fn delete(&self, resources: &ResourceManager, txn: &Transaction, id: &ObjectId) -> CoreResult<()> {
        let ctx = txn.ctx();
        let fragment = self.locate(id, ctx).ok_or_else(|| CoreError::DeleteConflict {
            id: id.clone(),
            reason: ConflictReason::NotFound,
        })?;

        resources.lock_fragment_resource(txn, &fragment)?.delete(id, ctx)?;
        self.records.delete(id, ctx)?;
        self.push(ctx.id, Pending::Removed(id.clone(), fragment));
        Ok(())
    }

    /// Replaces an indexed object in its fragment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UpdateConflict`] if the id is not indexed for this
    /// transaction, or the fragment's own update conflict.
    pub fn update(&self, resources: &ResourceManager, txn: &Transaction, object: Object) -> CoreResult<()> {
        let ctx = txn.ctx();
        let fragment = self
            .locate(&object.id, ctx)
            .ok_or_else(|| CoreError::UpdateConflict {
                id: object.id.clone(),
                reason: ConflictReason::NotFound,
            })?;
        resources.lock_fragment_resource(txn, &fragment)?.update(object, ctx)
    }

    /// Reads an indexed object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadNotFound`] if the id is not visible.
    pub fn read(&self, resources: &ResourceManager, txn: &Transaction, id: &ObjectId) -> CoreResult<Object> {
        let ctx = txn.ctx();
        let fragment = self
            .locate(id, ctx)
            .ok_or_else(|| CoreError::read_not_found(&self.class, id))?;
        resources.lock_fragment_resource(txn, &fragment)?.read(id, ctx)
    }

    /// Reads every object of the class visible to `txn`.
    ///
    /// # Errors
    ///
    /// Returns an error if a fragment cannot be loaded.
    pub fn read_all(
        &self,
        resources: &ResourceManager,
        txn: &Transaction,
    ) -> CoreResult<BTreeMap<ObjectId, Object>> {
        let ctx = txn.ctx();
        let fragments: BTreeSet<ResourceId> = self
            .records
            .read_all(ctx)
            .values()
            .filter_map(|record| IndexRecord::from_object(record).ok())
            .map(|record| record.fragment)
            .collect();

        let mut objects = BTreeMap::new();
        for fragment in fragments {
            objects.extend(resources.lock_fragment_resource(txn, &fragment)?.read_all(ctx));
        }
        Ok(objects)
    }

    /// Known fragments, sorted.
    #[must_use]
    pub fn fragments(&self) -> Vec<ResourceId> {
        let mut fragments: Vec<ResourceId> = self.maps.lock().live.keys().cloned().collect();
        fragments.sort();
        fragments
    }

    /// Number of objects placed in `fragment`.
    #[must_use]
    pub fn live_count(&self, fragment: &ResourceId) -> usize {
        self.maps.lock().live.get(fragment).copied().unwrap_or(0)
    }

    /// The fragment `id` is placed in, including uncommitted placements.
    #[must_use]
    pub fn fragment_of(&self, id: &ObjectId) -> Option<ResourceId> {
        self.maps.lock().by_object.get(id).cloned()
    }

    /// Objects per fragment.
    #[must_use]
    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }
}

impl TransactionalResource for FragmentIndex {
    fn id(&self) -> &ResourceId {
        self.records.id()
    }

    fn prepare(&self, txn: TxnContext) -> CoreResult<()> {
        if self.records.prepare_and_load(txn)? {
            if let Err(e) = self.rebuild() {
                self.records.rollback(txn);
                return Err(e);
            }
        }
        Ok(())
    }

    fn commit(&self, txn: TxnContext, stamp: Timestamp) -> CoreResult<CommittedResourceRecord> {
        let record = self.records.commit(txn, stamp)?;
        let pending = self.pending.lock().remove(&txn.id).unwrap_or_default();
        let mut maps = self.maps.lock();
        for change in pending {
            if let Pending::Removed(id, fragment) = change {
                maps.unplace(&id, &fragment);
            }
        }
        Ok(record)
    }

    fn rollback(&self, txn: TxnContext) {
        self.records.rollback(txn);
        let pending = self.pending.lock().remove(&txn.id).unwrap_or_default();
        let mut maps = self.maps.lock();
        for change in pending.into_iter().rev() {
            if let Pending::Placed(id, fragment) = change {
                maps.unplace(&id, &fragment);
            }
        }
    }

    fn rollback_failed_commit(
        &self,
        txn: TxnContext,
        record: &CommittedResourceRecord,
    ) -> CoreResult<()> {
        self.pending.lock().remove(&txn.id);
        self.unapply(record);
        self.records.rollback_failed_commit(txn, record)
    }

    fn pins(&self) -> usize {
        self.records.pins()
    }
}

/// Result of checking the committed index of a class against its fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentReport {
    /// The checked class.
    pub class: String,
    /// Stored fragments with their object counts, sorted by id.
    pub fragments: Vec<(ResourceId, usize)>,
    /// Number of index records.
    pub indexed: usize,
    /// Indexed ids absent from the fragment the index names.
    pub missing: Vec<ObjectId>,
    /// Ids found in a fragment the index does not map them to.
    pub unindexed: Vec<ObjectId>,
    /// Fragments holding more objects than the configured size.
    pub over_capacity: Vec<ResourceId>,
}

impl FragmentReport {
    /// Returns true if index and fragments agree and no fragment is full
    /// beyond capacity.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.unindexed.is_empty() && self.over_capacity.is_empty()
    }
}

/// Reads the committed index and fragment files of `class` straight from
/// storage and cross-checks them.
///
/// # Errors
///
/// Returns an error if a file cannot be read or decoded.
pub fn verify(
    backend: &dyn StorageBackend,
    codec: &dyn ObjectCodec,
    class: &str,
    fragment_size: usize,
) -> CoreResult<FragmentReport> {
    let mut index: BTreeMap<ObjectId, ResourceId> = BTreeMap::new();
    if let Some(bytes) = backend.read(index_resource_id(class).as_str())? {
        for object in codec.decode(&bytes)? {
            let record = IndexRecord::from_object(&object)?;
            index.insert(record.object_id, record.fragment);
        }
    }

    let prefix = fragment_prefix(class);
    let mut report = FragmentReport {
        class: class.to_string(),
        indexed: index.len(),
        ..FragmentReport::default()
    };
    let mut stored: HashMap<ResourceId, BTreeSet<ObjectId>> = HashMap::new();
    for key in backend.keys()?.into_iter().filter(|k| k.starts_with(&prefix)) {
        let fragment = ResourceId::new(key);
        let objects = match backend.read(fragment.as_str())? {
            Some(bytes) => codec.decode(&bytes)?,
            None => Vec::new(),
        };
        if objects.len() > fragment_size {
            report.over_capacity.push(fragment.clone());
        }
        for object in &objects {
            if index.get(&object.id) != Some(&fragment) {
                report.unindexed.push(object.id.clone());
            }
        }
        report.fragments.push((fragment.clone(), objects.len()));
        stored.insert(fragment, objects.into_iter().map(|o| o.id).collect());
    }
    report.fragments.sort();

    for (id, fragment) in &index {
        if !stored.get(fragment).is_some_and(|ids| ids.contains(id)) {
            report.missing.push(id.clone());
        }
    }
    Ok(report)
}
