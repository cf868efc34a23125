//! Resource directory and resource naming.
//!
//! Every resource has a deterministic id built from its class, its policy and
//! an optional discriminator:
//!
//! | Resource | Id |
//! |---|---|
//! | class file | `Planet` |
//! | object file | `Moon/Moon-luna` |
//! | references index of an object-file class | `Moon-refs` |
//! | fragment index | `Planet-index` |
//! | fragment | `Planet/Planet-fragment-<uuid>` |
//!
//! The directory maps ids to live resources and counts how many transactions
//! hold each one. A resource is evicted when the last of them releases it, so
//! the next transaction reloads it from disk. The commit stamps of an evicted
//! resource are kept until no transaction is live and handed to its next
//! load, so a transaction that began before a commit still sees it as stale.

use crate::error::{CoreError, CoreResult};
use crate::fragment::FragmentIndex;
use crate::resource::{Resource, ResourceKind, TransactionalResource};
use crate::transaction::Transaction;
use crate::trigger::TriggerManager;
use crate::types::{ResourceId, Timestamp};
use parking_lot::Mutex;
use shelfdb_codec::{ObjectCodec, ObjectId};
use shelfdb_storage::StorageBackend;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Id of the single file holding every object of `class`.
#[must_use]
pub fn class_resource_id(class: &str) -> ResourceId {
    ResourceId::new(class)
}

/// Id of the file holding one object of an object-file class.
#[must_use]
pub fn object_resource_id(class: &str, id: &ObjectId) -> ResourceId {
    ResourceId::new(format!("{class}/{class}-{}", escape_segment(id.as_str())))
}

/// Id of the references index of an object-file class.
#[must_use]
pub fn references_resource_id(class: &str) -> ResourceId {
    ResourceId::new(format!("{class}-refs"))
}

/// Id of the fragment index of a fragmented class.
#[must_use]
pub fn index_resource_id(class: &str) -> ResourceId {
    ResourceId::new(format!("{class}-index"))
}

/// A fresh fragment id for `class`.
#[must_use]
pub fn new_fragment_resource_id(class: &str) -> ResourceId {
    ResourceId::new(format!("{}{}", fragment_prefix(class), Uuid::new_v4().simple()))
}

/// Common prefix of every fragment id of `class`.
#[must_use]
pub fn fragment_prefix(class: &str) -> String {
    format!("{class}/{class}-fragment-")
}

/// The role a stored key plays in the layout above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRole {
    /// Every object of the class.
    ClassFile {
        /// Class name.
        class: String,
    },
    /// One object of an object-file class.
    ObjectFile {
        /// Class name.
        class: String,
    },
    /// References index of an object-file class.
    References {
        /// Class name.
        class: String,
    },
    /// Fragment index of a fragmented class.
    FragmentIndex {
        /// Class name.
        class: String,
    },
    /// One fragment of a fragmented class.
    Fragment {
        /// Class name.
        class: String,
    },
}

impl ResourceRole {
    /// Classifies a stored key.
    #[must_use]
    pub fn of(key: &str) -> Self {
        if let Some((class, file)) = key.split_once('/') {
            let class = class.to_string();
            if file.starts_with(&format!("{class}-fragment-")) {
                return Self::Fragment { class };
            }
            return Self::ObjectFile { class };
        }
        if let Some(class) = key.strip_suffix("-refs") {
            return Self::References {
                class: class.to_string(),
            };
        }
        if let Some(class) = key.strip_suffix("-index") {
            return Self::FragmentIndex {
                class: class.to_string(),
            };
        }
        Self::ClassFile {
            class: key.to_string(),
        }
    }

    /// The class the resource belongs to.
    #[must_use]
    pub fn class(&self) -> &str {
        match self {
            Self::ClassFile { class }
            | Self::ObjectFile { class }
            | Self::References { class }
            | Self::FragmentIndex { class }
            | Self::Fragment { class } => class,
        }
    }

    /// Short name of the role.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClassFile { .. } => "class",
            Self::ObjectFile { .. } => "object",
            Self::References { .. } => "references",
            Self::FragmentIndex { .. } => "index",
            Self::Fragment { .. } => "fragment",
        }
    }

    /// What the file holds.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::References { .. } => ResourceKind::References,
            _ => ResourceKind::Objects,
        }
    }
}

/// Keeps ids usable as a single path segment: anything outside
/// `[A-Za-z0-9._-]` becomes `%XX`.
fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

#[derive(Debug, Clone)]
enum Slot {
    Plain(Arc<Resource>),
    Index(Arc<FragmentIndex>),
}

impl Slot {
    fn participant(&self) -> Arc<dyn TransactionalResource> {
        match self {
            Slot::Plain(r) => Arc::clone(r) as Arc<dyn TransactionalResource>,
            Slot::Index(i) => Arc::clone(i) as Arc<dyn TransactionalResource>,
        }
    }

    fn commit_stamps(&self) -> HashMap<ObjectId, Timestamp> {
        match self {
            Slot::Plain(r) => r.commit_stamps(),
            Slot::Index(i) => i.commit_stamps(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    pins: usize,
}

/// Reference-counted directory of live resources.
pub struct ResourceManager {
    backend: Arc<dyn StorageBackend>,
    codec: Arc<dyn ObjectCodec>,
    triggers: Arc<TriggerManager>,
    fragment_size: usize,
    directory: Mutex<HashMap<ResourceId, Entry>>,
    stamps: Mutex<HashMap<ResourceId, HashMap<ObjectId, Timestamp>>>,
}

impl ResourceManager {
    /// Creates an empty directory.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        codec: Arc<dyn ObjectCodec>,
        triggers: Arc<TriggerManager>,
        fragment_size: usize,
    ) -> Self {
        Self {
            backend,
            codec,
            triggers,
            fragment_size: fragment_size.max(1),
            directory: Mutex::new(HashMap::new()),
            stamps: Mutex::new(HashMap::new()),
        }
    }

    /// The storage backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// The codec used for backing files.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn ObjectCodec> {
        &self.codec
    }

    /// Objects per fragment.
    #[must_use]
    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    fn plain(&self, id: &ResourceId, kind: ResourceKind) -> Slot {
        let triggers = (kind == ResourceKind::Objects).then(|| Arc::clone(&self.triggers));
        Slot::Plain(Arc::new(
            Resource::new(
                id.clone(),
                kind,
                Arc::clone(&self.backend),
                Arc::clone(&self.codec),
                triggers,
            )
            .with_commit_stamps(self.saved_stamps(id)),
        ))
    }

    fn saved_stamps(&self, id: &ResourceId) -> HashMap<ObjectId, Timestamp> {
        self.stamps.lock().get(id).cloned().unwrap_or_default()
    }

    /// Gets or creates the resource, registers it with `txn` and pins it.
    fn lock(
        &self,
        txn: &Transaction,
        id: ResourceId,
        create: impl FnOnce(&ResourceId) -> Slot,
    ) -> CoreResult<Slot> {
        let mut directory = self.directory.lock();
        let created = !directory.contains_key(&id);
        let slot = directory
            .entry(id.clone())
            .or_insert_with(|| Entry {
                slot: create(&id),
                pins: 0,
            })
            .slot
            .clone();

        match txn.register(slot.participant()) {
            Ok(true) => {
                if let Some(entry) = directory.get_mut(&id) {
                    entry.pins += 1;
                }
                if created {
                    debug!(resource = %id, txn = %txn.id(), "created resource");
                }
                Ok(slot)
            }
            Ok(false) => Ok(slot),
            Err(e) => {
                if created {
                    directory.remove(&id);
                }
                Err(e)
            }
        }
    }

    fn lock_plain(
        &self,
        txn: &Transaction,
        id: ResourceId,
        kind: ResourceKind,
    ) -> CoreResult<Arc<Resource>> {
        match self.lock(txn, id.clone(), |id| self.plain(id, kind))? {
            Slot::Plain(resource) => Ok(resource),
            Slot::Index(_) => Err(CoreError::invalid_operation(format!(
                "resource {id} is a fragment index"
            ))),
        }
    }

    /// Locks the class file of `class`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded.
    pub fn lock_class_resource(&self, txn: &Transaction, class: &str) -> CoreResult<Arc<Resource>> {
        self.lock_plain(txn, class_resource_id(class), ResourceKind::Objects)
    }

    /// Locks the file of one object of `class`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded.
    pub fn lock_object_resource(
        &self,
        txn: &Transaction,
        class: &str,
        id: &ObjectId,
    ) -> CoreResult<Arc<Resource>> {
        self.lock_plain(txn, object_resource_id(class, id), ResourceKind::Objects)
    }

    /// Locks the references index of `class`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded.
    pub fn lock_references_resource(
        &self,
        txn: &Transaction,
        class: &str,
    ) -> CoreResult<Arc<Resource>> {
        self.lock_plain(txn, references_resource_id(class), ResourceKind::References)
    }

    /// Locks one fragment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded.
    pub fn lock_fragment_resource(
        &self,
        txn: &Transaction,
        fragment: &ResourceId,
    ) -> CoreResult<Arc<Resource>> {
        self.lock_plain(txn, fragment.clone(), ResourceKind::Objects)
    }

    /// Locks the fragment index of `class`, rebuilding it if it was loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be loaded.
    pub fn lock_index_resource(
        &self,
        txn: &Transaction,
        class: &str,
    ) -> CoreResult<Arc<FragmentIndex>> {
        let id = index_resource_id(class);
        let slot = self.lock(txn, id.clone(), |id| {
            let records = Resource::new(
                id.clone(),
                ResourceKind::Objects,
                Arc::clone(&self.backend),
                Arc::clone(&self.codec),
                None,
            )
            .with_commit_stamps(self.saved_stamps(id));
            Slot::Index(Arc::new(FragmentIndex::new(class, records, self.fragment_size)))
        })?;
        match slot {
            Slot::Index(index) => Ok(index),
            Slot::Plain(_) => Err(CoreError::invalid_operation(format!(
                "resource {id} is not a fragment index"
            ))),
        }
    }

    /// Drops one pin of `id`, evicting the resource at zero. The commit
    /// stamps of an evicted resource are saved for its next load.
    pub fn release(&self, id: &ResourceId) {
        let mut directory = self.directory.lock();
        let evict = match directory.get_mut(id) {
            Some(entry) => {
                entry.pins = entry.pins.saturating_sub(1);
                entry.pins == 0
            }
            None => false,
        };
        if !evict {
            return;
        }
        if let Some(entry) = directory.remove(id) {
            let stamps = entry.slot.commit_stamps();
            if !stamps.is_empty() {
                self.stamps.lock().entry(id.clone()).or_default().extend(stamps);
            }
            debug!(resource = %id, "evicted resource");
        }
    }

    /// Drops every saved commit stamp. Called once no transaction is live,
    /// since any later transaction starts after all of them.
    pub fn forget_commit_stamps(&self) {
        let mut stamps = self.stamps.lock();
        if !stamps.is_empty() {
            debug!(resources = stamps.len(), "dropped saved commit stamps");
            stamps.clear();
        }
    }

    /// Number of evicted resources whose commit stamps are saved.
    #[must_use]
    pub fn saved_stamp_count(&self) -> usize {
        self.stamps.lock().len()
    }

    /// Number of transactions pinning `id`; `None` if it is not cached.
    #[must_use]
    pub fn pins(&self, id: &ResourceId) -> Option<usize> {
        self.directory.lock().get(id).map(|e| e.pins)
    }

    /// Number of cached resources.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.directory.lock().len()
    }

    /// Ids of every stored fragment of `class`, read from storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot list its keys.
    pub fn stored_fragments(&self, class: &str) -> CoreResult<Vec<ResourceId>> {
        let prefix = fragment_prefix(class);
        Ok(self
            .backend
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .map(ResourceId::new)
            .collect())
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("codec", &self.codec.name())
            .field("fragment_size", &self.fragment_size)
            .field("cached", &self.directory.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConflictReason;
    use crate::transaction::TransactionManager;
    use shelfdb_codec::{CborCodec, Object};
    use shelfdb_storage::InMemoryBackend;

    fn managers() -> (Arc<ResourceManager>, Arc<TransactionManager>) {
        let resources = Arc::new(ResourceManager::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(CborCodec::new()),
            Arc::new(TriggerManager::new()),
            4,
        ));
        let transactions = Arc::new(TransactionManager::new(Arc::clone(&resources), false));
        (resources, transactions)
    }

    #[test]
    fn commit_stamps_outlive_eviction() {
        let (resources, transactions) = managers();
        let mut setup = transactions.begin().unwrap();
        resources
            .lock_class_resource(&setup, "Planet")
            .unwrap()
            .insert(Object::new("Planet", "1"), setup.ctx())
            .unwrap();
        transactions.commit(&mut setup).unwrap();
        assert_eq!(resources.saved_stamp_count(), 0);

        let mut older = transactions.begin().unwrap();
        let mut writer = transactions.begin().unwrap();
        resources
            .lock_class_resource(&writer, "Planet")
            .unwrap()
            .update(Object::new("Planet", "1").with("name", "Earth"), writer.ctx())
            .unwrap();
        transactions.commit(&mut writer).unwrap();
        assert_eq!(resources.pins(&class_resource_id("Planet")), None);
        assert_eq!(resources.saved_stamp_count(), 1);

        let planets = resources.lock_class_resource(&older, "Planet").unwrap();
        assert!(matches!(
            planets.update(Object::new("Planet", "1"), older.ctx()),
            Err(CoreError::UpdateConflict {
                reason: ConflictReason::Stale,
                ..
            })
        ));
        transactions.rollback(&mut older).unwrap();
        assert_eq!(resources.saved_stamp_count(), 0);
    }

    #[test]
    fn resource_ids_follow_layout() {
        assert_eq!(class_resource_id("Planet").as_str(), "Planet");
        assert_eq!(
            object_resource_id("Moon", &ObjectId::new("luna")).as_str(),
            "Moon/Moon-luna"
        );
        assert_eq!(references_resource_id("Moon").as_str(), "Moon-refs");
        assert_eq!(index_resource_id("Planet").as_str(), "Planet-index");
        assert!(new_fragment_resource_id("Planet")
            .as_str()
            .starts_with("Planet/Planet-fragment-"));
    }

    #[test]
    fn keys_classify_back_to_roles() {
        let moon = ObjectId::new("luna");
        let cases = [
            (class_resource_id("Planet"), "class"),
            (object_resource_id("Moon", &moon), "object"),
            (references_resource_id("Moon"), "references"),
            (index_resource_id("Planet"), "index"),
            (new_fragment_resource_id("Planet"), "fragment"),
        ];
        for (id, role) in cases {
            let classified = ResourceRole::of(id.as_str());
            assert_eq!(classified.name(), role, "{id}");
            assert!(matches!(classified.class(), "Planet" | "Moon"));
        }
        assert_eq!(
            ResourceRole::of("Moon-refs").kind(),
            ResourceKind::References
        );
    }

    #[test]
    fn fragment_ids_are_unique() {
        assert_ne!(
            new_fragment_resource_id("Planet"),
            new_fragment_resource_id("Planet")
        );
    }

    #[test]
    fn object_ids_are_escaped() {
        assert_eq!(
            object_resource_id("Doc", &ObjectId::new("a/b c")).as_str(),
            "Doc/Doc-a%2Fb%20c"
        );
        assert_eq!(
            object_resource_id("Doc", &ObjectId::new("..")).as_str(),
            "Doc/Doc-.."
        );
    }
}
