//! Store facade.

use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::{ConflictReason, CoreError, CoreResult};
use crate::fragment::{self, FragmentReport};
use crate::policy::StoragePolicy;
use crate::resource::Resource;
use crate::resources::ResourceManager;
use crate::schema::{Persistent, PropertyList, SchemaRegistry};
use crate::transaction::{Transaction, TransactionManager};
use crate::trigger::TriggerManager;
use shelfdb_codec::{codec_by_name, Object, ObjectCodec, ObjectId};
use shelfdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The main store handle.
///
/// `Store` is the entry point for reading and writing objects. Every
/// operation runs inside an explicit [`Transaction`]:
///
/// ```rust,ignore
/// use shelfdb_core::{Config, Store, StoragePolicy, PropertyList};
/// use shelfdb_codec::Object;
/// use std::path::Path;
///
/// let store = Store::open(Path::new("my_store"), Config::default())?;
/// store.register_class("Planet", StoragePolicy::ClassFile, PropertyList::new(["name"]));
///
/// store.transaction(|txn| {
///     store.save_object(txn, Object::new("Planet", "3").with("name", "Earth"))
/// })?;
/// ```
///
/// Objects are routed by the policy of their class:
///
/// | Policy | Resources touched |
/// |---|---|
/// | `ClassFile` | the class file |
/// | `FragmentedClassFile` | the fragment index and one fragment |
/// | `ObjectFile` | the object's own file and the class references index |
/// | `Embedded` | none; the object lives inside its parent |
pub struct Store {
    config: Config,
    /// Holds the directory lock. None for stores over a caller backend.
    dir: Option<StoreDir>,
    codec: Arc<dyn ObjectCodec>,
    schema: SchemaRegistry,
    triggers: Arc<TriggerManager>,
    resources: Arc<ResourceManager>,
    txn_manager: Arc<TransactionManager>,
}

impl Store {
    /// Opens a store directory, locking it against other processes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process has the store locked (`DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let codec: Arc<dyn ObjectCodec> = Arc::from(codec_by_name(config.codec.name())?);
        let backend = FileBackend::open(dir.path())?.with_extension(codec.extension());
        info!(path = %path.display(), codec = codec.name(), "opened store");
        Ok(Self::assemble(config, Some(dir), Arc::new(backend), codec))
    }

    /// Opens a store over an existing backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured codec is unknown.
    pub fn with_backend(backend: Arc<dyn StorageBackend>, config: Config) -> CoreResult<Self> {
        let codec: Arc<dyn ObjectCodec> = Arc::from(codec_by_name(config.codec.name())?);
        Ok(Self::assemble(config, None, backend, codec))
    }

    /// Opens a fresh in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the default codec is unavailable.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::with_backend(Arc::new(InMemoryBackend::new()), Config::default())
    }

    fn assemble(
        config: Config,
        dir: Option<StoreDir>,
        backend: Arc<dyn StorageBackend>,
        codec: Arc<dyn ObjectCodec>,
    ) -> Self {
        let triggers = Arc::new(TriggerManager::new());
        let resources = Arc::new(ResourceManager::new(
            backend,
            Arc::clone(&codec),
            Arc::clone(&triggers),
            config.fragment_size,
        ));
        let txn_manager = Arc::new(TransactionManager::new(
            Arc::clone(&resources),
            config.thread_bound_transactions,
        ));
        Self {
            config,
            dir,
            codec,
            schema: SchemaRegistry::new(),
            triggers,
            resources,
            txn_manager,
        }
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The store directory, if opened from one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// The storage backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        self.resources.backend()
    }

    /// The codec backing files are written with.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn ObjectCodec> {
        &self.codec
    }

    /// The resource directory.
    #[must_use]
    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// The trigger registry.
    #[must_use]
    pub fn triggers(&self) -> &Arc<TriggerManager> {
        &self.triggers
    }

    /// The class registry.
    #[must_use]
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Returns true while a failed commit is being compensated.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.txn_manager.is_invalid()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDatabaseState`] while a failed commit is
    /// compensated, or [`CoreError::DuplicateTransaction`] if transactions are
    /// thread-bound and this thread already has one open.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.txn_manager.begin()
    }

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// Returns the commit failure; the transaction is rolled back in that case.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.txn_manager.commit(txn)
    }

    /// Rolls back a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is no longer active.
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.txn_manager.rollback(txn)
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// Returns the function's error or the commit failure.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction) -> CoreResult<T>,
    {
        let mut txn = self.begin()?;
        match f(&txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(e) => {
                self.rollback(&mut txn)?;
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Registers a class with its policy and persisted properties.
    pub fn register_class(&self, class: &str, policy: StoragePolicy, properties: PropertyList) {
        debug!(class, %policy, "registered class");
        self.schema.register(class, policy, properties);
    }

    /// Registers a typed class.
    pub fn register<T: Persistent>(&self) {
        self.register_class(T::CLASS, T::POLICY, T::properties());
    }

    /// Changes the policy of a registered class.
    ///
    /// Existing files are not migrated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownClass`] if the class is not registered.
    pub fn set_policy(&self, class: &str, policy: StoragePolicy) -> CoreResult<()> {
        self.schema.set_policy(class, policy)
    }

    /// The policy of a registered class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownClass`] if the class is not registered.
    pub fn policy(&self, class: &str) -> CoreResult<StoragePolicy> {
        self.schema.policy(class)
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Inserts an object, projected onto its class's properties.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InsertConflict`] if the id already exists,
    /// [`CoreError::UnknownClass`] or [`CoreError::InvalidPolicy`].
    pub fn save_object(&self, txn: &Transaction, object: Object) -> CoreResult<()> {
        txn.ensure_active()?;
        let policy = self.schema.policy(&object.class)?;
        let object = self.schema.project(object)?;
        let ctx = txn.ctx();
        let class = object.class.clone();

        match policy {
            StoragePolicy::ClassFile => self
                .resources
                .lock_class_resource(txn, &class)?
                .insert(object, ctx),
            StoragePolicy::FragmentedClassFile => self
                .resources
                .lock_index_resource(txn, &class)?
                .insert(&self.resources, txn, object)
                .map(drop),
            StoragePolicy::ObjectFile => {
                let id = object.id.clone();
                let refs = self.resources.lock_references_resource(txn, &class)?;
                refs.insert(Object::new(class.as_str(), id.clone()), ctx)?;
                let inserted = self
                    .resources
                    .lock_object_resource(txn, &class, &id)
                    .and_then(|resource| resource.insert(object, ctx));
                if inserted.is_err() {
                    if let Err(e) = refs.delete(&id, ctx) {
                        warn!(class = %class, %id, error = %e, "could not withdraw reference of failed insert");
                    }
                }
                inserted
            }
            StoragePolicy::Embedded => Err(invalid_policy(class, policy, "save")),
        }
    }

    /// Inserts several objects, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failure of [`Store::save_object`].
    pub fn save_objects(
        &self,
        txn: &Transaction,
        objects: impl IntoIterator<Item = Object>,
    ) -> CoreResult<()> {
        for object in objects {
            self.save_object(txn, object)?;
        }
        Ok(())
    }

    /// Reads one object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadNotFound`] if the object is not visible to
    /// `txn`.
    pub fn load_object(&self, txn: &Transaction, class: &str, id: &ObjectId) -> CoreResult<Object> {
        txn.ensure_active()?;
        let ctx = txn.ctx();
        match self.schema.policy(class)? {
            StoragePolicy::ClassFile => self.resources.lock_class_resource(txn, class)?.read(id, ctx),
            StoragePolicy::FragmentedClassFile => self
                .resources
                .lock_index_resource(txn, class)?
                .read(&self.resources, txn, id),
            StoragePolicy::ObjectFile => {
                self.resources
                    .lock_references_resource(txn, class)?
                    .read(id, ctx)?;
                self.resources
                    .lock_object_resource(txn, class, id)?
                    .read(id, ctx)
            }
            policy @ StoragePolicy::Embedded => Err(invalid_policy(class, policy, "load")),
        }
    }

    /// Reads every object of `class` visible to `txn`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource cannot be loaded.
    pub fn load_objects(&self, txn: &Transaction, class: &str) -> CoreResult<Vec<Object>> {
        Ok(self.load_map(txn, class)?.into_values().collect())
    }

    /// Reads the objects of `class` matching `predicate`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource cannot be loaded.
    pub fn load_objects_where<P>(
        &self,
        txn: &Transaction,
        class: &str,
        predicate: P,
    ) -> CoreResult<Vec<Object>>
    where
        P: Fn(&Object) -> bool,
    {
        Ok(self
            .load_map(txn, class)?
            .into_values()
            .filter(|object| predicate(object))
            .collect())
    }

    fn load_map(&self, txn: &Transaction, class: &str) -> CoreResult<BTreeMap<ObjectId, Object>> {
        txn.ensure_active()?;
        let ctx = txn.ctx();
        match self.schema.policy(class)? {
            StoragePolicy::ClassFile => {
                Ok(self.resources.lock_class_resource(txn, class)?.read_all(ctx))
            }
            StoragePolicy::FragmentedClassFile => self
                .resources
                .lock_index_resource(txn, class)?
                .read_all(&self.resources, txn),
            StoragePolicy::ObjectFile => {
                let refs = self.resources.lock_references_resource(txn, class)?.read_all(ctx);
                let mut objects = BTreeMap::new();
                for id in refs.into_keys() {
                    let resource: Arc<Resource> =
                        self.resources.lock_object_resource(txn, class, &id)?;
                    let object = resource.read(&id, ctx)?;
                    objects.insert(id, object);
                }
                Ok(objects)
            }
            policy @ StoragePolicy::Embedded => Err(invalid_policy(class, policy, "load")),
        }
    }

    /// Replaces an existing object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UpdateConflict`] if the object is unknown, being
    /// changed by another transaction, or was committed after `txn` began.
    pub fn update_object(&self, txn: &Transaction, object: Object) -> CoreResult<()> {
        txn.ensure_active()?;
        let policy = self.schema.policy(&object.class)?;
        let object = self.schema.project(object)?;
        let ctx = txn.ctx();
        let class = object.class.clone();

        match policy {
            StoragePolicy::ClassFile => self
                .resources
                .lock_class_resource(txn, &class)?
                .update(object, ctx),
            StoragePolicy::FragmentedClassFile => self
                .resources
                .lock_index_resource(txn, &class)?
                .update(&self.resources, txn, object),
            StoragePolicy::ObjectFile => {
                let id = object.id.clone();
                self.resources
                    .lock_object_resource(txn, &class, &id)?
                    .update(object, ctx)
            }
            StoragePolicy::Embedded => Err(invalid_policy(class, policy, "update")),
        }
    }

    /// Deletes an object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DeleteConflict`] if the object is unknown, being
    /// changed by another transaction, or was committed after `txn` began.
    pub fn delete_object(&self, txn: &Transaction, class: &str, id: &ObjectId) -> CoreResult<()> {
        txn.ensure_active()?;
        let ctx = txn.ctx();
        match self.schema.policy(class)? {
            StoragePolicy::ClassFile => self
                .resources
                .lock_class_resource(txn, class)?
                .delete(id, ctx),
            StoragePolicy::FragmentedClassFile => self
                .resources
                .lock_index_resource(txn, class)?
                .delete(&self.resources, txn, id),
            StoragePolicy::ObjectFile => {
                let refs = self.resources.lock_references_resource(txn, class)?;
                if !refs.contains(id, ctx) {
                    return Err(CoreError::DeleteConflict {
                        id: id.clone(),
                        reason: ConflictReason::NotFound,
                    });
                }
                self.resources
                    .lock_object_resource(txn, class, id)?
                    .delete(id, ctx)?;
                refs.delete(id, ctx)
            }
            policy @ StoragePolicy::Embedded => Err(invalid_policy(class, policy, "delete")),
        }
    }

    /// Deletes several objects of one class, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failure of [`Store::delete_object`].
    pub fn delete_objects<'a>(
        &self,
        txn: &Transaction,
        class: &str,
        ids: impl IntoIterator<Item = &'a ObjectId>,
    ) -> CoreResult<()> {
        for id in ids {
            self.delete_object(txn, class, id)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------
    //
    // Roots are top-level objects kept in a class file or in object files.

    fn ensure_root(&self, class: &str, operation: &'static str) -> CoreResult<()> {
        match self.schema.policy(class)? {
            StoragePolicy::ClassFile | StoragePolicy::ObjectFile => Ok(()),
            policy => Err(invalid_policy(class, policy, operation)),
        }
    }

    /// Inserts a root object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPolicy`] unless the class is stored as a
    /// class file or as object files, else as [`Store::save_object`].
    pub fn save_root(&self, txn: &Transaction, root: Object) -> CoreResult<()> {
        self.ensure_root(&root.class, "save root")?;
        self.save_object(txn, root)
    }

    /// Reads one root object.
    ///
    /// # Errors
    ///
    /// As [`Store::save_root`] and [`Store::load_object`].
    pub fn load_root(&self, txn: &Transaction, class: &str, id: &ObjectId) -> CoreResult<Object> {
        self.ensure_root(class, "load root")?;
        self.load_object(txn, class, id)
    }

    /// Reads every root object of `class`, keyed by id.
    ///
    /// # Errors
    ///
    /// As [`Store::save_root`] and [`Store::load_objects`].
    pub fn load_roots(
        &self,
        txn: &Transaction,
        class: &str,
    ) -> CoreResult<BTreeMap<ObjectId, Object>> {
        self.ensure_root(class, "load roots")?;
        self.load_map(txn, class)
    }

    /// Replaces a root object.
    ///
    /// # Errors
    ///
    /// As [`Store::save_root`] and [`Store::update_object`].
    pub fn update_root(&self, txn: &Transaction, root: Object) -> CoreResult<()> {
        self.ensure_root(&root.class, "update root")?;
        self.update_object(txn, root)
    }

    /// Deletes a root object.
    ///
    /// # Errors
    ///
    /// As [`Store::save_root`] and [`Store::delete_object`].
    pub fn delete_root(&self, txn: &Transaction, class: &str, id: &ObjectId) -> CoreResult<()> {
        self.ensure_root(class, "delete root")?;
        self.delete_object(txn, class, id)
    }

    // ------------------------------------------------------------------
    // Typed access
    // ------------------------------------------------------------------

    /// Inserts a typed value.
    ///
    /// # Errors
    ///
    /// As [`Store::save_object`].
    pub fn insert<T: Persistent>(&self, txn: &Transaction, value: &T) -> CoreResult<()> {
        self.save_object(txn, value.to_object())
    }

    /// Reads a typed value.
    ///
    /// # Errors
    ///
    /// As [`Store::load_object`], or [`CoreError::Schema`] if the stored
    /// properties do not convert.
    pub fn get<T: Persistent>(&self, txn: &Transaction, id: &ObjectId) -> CoreResult<T> {
        T::from_object(&self.load_object(txn, T::CLASS, id)?)
    }

    /// Reads every typed value of the class, ordered by id.
    ///
    /// # Errors
    ///
    /// As [`Store::load_objects`] and [`Store::get`].
    pub fn all<T: Persistent>(&self, txn: &Transaction) -> CoreResult<Vec<T>> {
        self.load_map(txn, T::CLASS)?
            .values()
            .map(T::from_object)
            .collect()
    }

    /// Replaces a typed value.
    ///
    /// # Errors
    ///
    /// As [`Store::update_object`].
    pub fn update<T: Persistent>(&self, txn: &Transaction, value: &T) -> CoreResult<()> {
        self.update_object(txn, value.to_object())
    }

    /// Deletes a typed value by id.
    ///
    /// # Errors
    ///
    /// As [`Store::delete_object`].
    pub fn remove<T: Persistent>(&self, txn: &Transaction, id: &ObjectId) -> CoreResult<()> {
        self.delete_object(txn, T::CLASS, id)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Checks the committed fragment index of `class` against its fragments.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or decoded.
    pub fn verify_fragments(&self, class: &str) -> CoreResult<FragmentReport> {
        fragment::verify(
            self.backend().as_ref(),
            self.codec.as_ref(),
            class,
            self.resources.fragment_size(),
        )
    }
}

fn invalid_policy(class: impl Into<String>, policy: StoragePolicy, operation: &'static str) -> CoreError {
    CoreError::InvalidPolicy {
        class: class.into(),
        policy,
        operation,
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path())
            .field("codec", &self.codec.name())
            .field("classes", &self.schema.classes())
            .field("transactions", &self.txn_manager)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChangeKind;
    use crate::config::CodecKind;
    use crate::resources::{class_resource_id, index_resource_id, references_resource_id};
    use crate::schema::{self, Identifiable};
    use parking_lot::Mutex;
    use shelfdb_codec::Value;
    use shelfdb_storage::{StorageError, StorageResult};
    use std::time::Duration;

    fn planet(id: &str, name: &str) -> Object {
        Object::new("Planet", id).with("name", name)
    }

    fn memory_store(config: Config) -> (Arc<InMemoryBackend>, Store) {
        let backend = Arc::new(InMemoryBackend::new());
        let store = Store::with_backend(Arc::clone(&backend) as Arc<dyn StorageBackend>, config).unwrap();
        (backend, store)
    }

    fn store_with(policy: StoragePolicy, config: Config) -> (Arc<InMemoryBackend>, Store) {
        let (backend, store) = memory_store(config);
        store.register_class("Planet", policy, PropertyList::new(["name"]));
        (backend, store)
    }

    #[test]
    fn save_and_load_class_file() {
        let (backend, store) = store_with(StoragePolicy::ClassFile, Config::default());
        store
            .transaction(|txn| {
                store.save_objects(txn, [planet("1", "Mercury"), planet("2", "Venus")])
            })
            .unwrap();

        assert!(backend.snapshot("Planet").is_some());
        let loaded = store
            .transaction(|txn| store.load_objects(txn, "Planet"))
            .unwrap();
        assert_eq!(loaded, vec![planet("1", "Mercury"), planet("2", "Venus")]);
    }

    #[test]
    fn undeclared_properties_are_not_persisted() {
        let (_, store) = store_with(StoragePolicy::ClassFile, Config::default());
        store
            .transaction(|txn| store.save_object(txn, planet("1", "Mars").with("colour", "red")))
            .unwrap();
        let loaded = store
            .transaction(|txn| store.load_object(txn, "Planet", &ObjectId::new("1")))
            .unwrap();
        assert_eq!(loaded, planet("1", "Mars"));
    }

    #[test]
    fn uncommitted_changes_are_invisible_to_others() {
        let config = Config::default().thread_bound_transactions(false);
        let (_, store) = store_with(StoragePolicy::ClassFile, config);
        store
            .transaction(|txn| store.save_object(txn, planet("1", "Earth")))
            .unwrap();

        let mut writer = store.begin().unwrap();
        store.update_object(&writer, planet("1", "Terra")).unwrap();
        store.save_object(&writer, planet("2", "Mars")).unwrap();

        let mut reader = store.begin().unwrap();
        assert_eq!(
            store.load_objects(&reader, "Planet").unwrap(),
            vec![planet("1", "Earth")]
        );
        assert_eq!(
            store.load_objects(&writer, "Planet").unwrap(),
            vec![planet("1", "Terra"), planet("2", "Mars")]
        );

        store.commit(&mut writer).unwrap();
        store.commit(&mut reader).unwrap();
    }

    #[test]
    fn second_writer_is_refused() {
        let config = Config::default().thread_bound_transactions(false);
        let (_, store) = store_with(StoragePolicy::ClassFile, config);
        store
            .transaction(|txn| store.save_object(txn, planet("1", "Earth")))
            .unwrap();

        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();
        store.update_object(&first, planet("1", "Terra")).unwrap();

        let err = store.update_object(&second, planet("1", "Gaia")).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UpdateConflict {
                reason: ConflictReason::OwnedByOther,
                ..
            }
        ));
        store.rollback(&mut second).unwrap();
        store.commit(&mut first).unwrap();
    }

    #[test]
    fn stale_update_is_refused() {
        let config = Config::default().thread_bound_transactions(false);
        let (_, store) = store_with(StoragePolicy::ClassFile, config);
        store
            .transaction(|txn| store.save_object(txn, planet("1", "Earth")))
            .unwrap();

        let mut early = store.begin().unwrap();
        store.load_objects(&early, "Planet").unwrap();

        let mut late = store.begin().unwrap();
        store.update_object(&late, planet("1", "Terra")).unwrap();
        store.commit(&mut late).unwrap();

        let err = store.update_object(&early, planet("1", "Gaia")).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UpdateConflict {
                reason: ConflictReason::Stale,
                ..
            }
        ));
        store.rollback(&mut early).unwrap();
    }

    #[test]
    fn stale_write_is_refused_after_reload() {
        for policy in [
            StoragePolicy::ClassFile,
            StoragePolicy::ObjectFile,
            StoragePolicy::FragmentedClassFile,
        ] {
            let config = Config::default().thread_bound_transactions(false);
            let (_, store) = store_with(policy, config);
            store
                .transaction(|txn| store.save_object(txn, planet("1", "Earth")))
                .unwrap();

            let mut early = store.begin().unwrap();
            let mut late = store.begin().unwrap();
            store.update_object(&late, planet("1", "Terra")).unwrap();
            store.commit(&mut late).unwrap();

            let err = store.update_object(&early, planet("1", "Gaia")).unwrap_err();
            assert!(
                matches!(
                    err,
                    CoreError::UpdateConflict {
                        reason: ConflictReason::Stale,
                        ..
                    }
                ),
                "{policy}: {err:?}"
            );
            assert!(
                matches!(
                    store.delete_object(&early, "Planet", &ObjectId::new("1")),
                    Err(CoreError::DeleteConflict {
                        reason: ConflictReason::Stale,
                        ..
                    })
                ),
                "{policy}"
            );
            store.rollback(&mut early).unwrap();

            store
                .transaction(|txn| store.update_object(txn, planet("1", "Gaia")))
                .unwrap();
        }
    }

    #[test]
    fn commit_without_changes_writes_nothing() {
        let (backend, store) = store_with(StoragePolicy::ClassFile, Config::default());
        store
            .transaction(|txn| store.save_object(txn, planet("1", "Earth")))
            .unwrap();
        backend.reset_counters();

        store
            .transaction(|txn| store.load_objects(txn, "Planet"))
            .unwrap();
        assert_eq!(backend.write_count(), 0);
        assert_eq!(backend.remove_count(), 0);
    }

    #[test]
    fn rollback_discards_changes() {
        let (backend, store) = store_with(StoragePolicy::ClassFile, Config::default());
        store
            .transaction(|txn| store.save_object(txn, planet("1", "Earth")))
            .unwrap();
        let before = backend.snapshot("Planet");

        let mut txn = store.begin().unwrap();
        store.delete_object(&txn, "Planet", &ObjectId::new("1")).unwrap();
        store.save_object(&txn, planet("2", "Mars")).unwrap();
        store.rollback(&mut txn).unwrap();

        assert_eq!(backend.snapshot("Planet"), before);
        let loaded = store
            .transaction(|txn| store.load_objects(txn, "Planet"))
            .unwrap();
        assert_eq!(loaded, vec![planet("1", "Earth")]);
    }

    #[test]
    fn failing_closure_rolls_back() {
        let (_, store) = store_with(StoragePolicy::ClassFile, Config::default());
        let result: CoreResult<()> = store.transaction(|txn| {
            store.save_object(txn, planet("1", "Earth"))?;
            Err(CoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        let loaded = store
            .transaction(|txn| store.load_objects(txn, "Planet"))
            .unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let (_, store) = store_with(StoragePolicy::ClassFile, Config::default());
        {
            let txn = store.begin().unwrap();
            store.save_object(&txn, planet("1", "Earth")).unwrap();
        }
        assert_eq!(store.resources().cached_count(), 0);
        let loaded = store
            .transaction(|txn| store.load_objects(txn, "Planet"))
            .unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn resources_are_evicted_after_commit() {
        let (_, store) = store_with(StoragePolicy::ClassFile, Config::default());
        let mut txn = store.begin().unwrap();
        store.save_object(&txn, planet("1", "Earth")).unwrap();
        assert_eq!(store.resources().pins(&class_resource_id("Planet")), Some(1));
        store.commit(&mut txn).unwrap();
        assert_eq!(store.resources().pins(&class_resource_id("Planet")), None);
    }

    #[test]
    fn duplicate_transaction_on_one_thread() {
        let (_, store) = store_with(StoragePolicy::ClassFile, Config::default());
        let mut txn = store.begin().unwrap();
        assert!(matches!(
            store.begin(),
            Err(CoreError::DuplicateTransaction { .. })
        ));
        store.commit(&mut txn).unwrap();
        let mut again = store.begin().unwrap();
        store.rollback(&mut again).unwrap();
    }

    #[test]
    fn closed_transaction_is_rejected() {
        let (_, store) = store_with(StoragePolicy::ClassFile, Config::default());
        let mut txn = store.begin().unwrap();
        store.commit(&mut txn).unwrap();
        assert!(matches!(
            store.save_object(&txn, planet("1", "Earth")),
            Err(CoreError::TransactionNotActive { .. })
        ));
        assert!(matches!(
            store.commit(&mut txn),
            Err(CoreError::TransactionNotActive { .. })
        ));
    }

    #[test]
    fn unknown_class_and_embedded_policy() {
        let (_, store) = memory_store(Config::default());
        store.register_class("Orbit", StoragePolicy::Embedded, PropertyList::any());
        store
            .transaction(|txn| {
                assert!(matches!(
                    store.save_object(txn, planet("1", "Earth")),
                    Err(CoreError::UnknownClass { .. })
                ));
                assert!(matches!(
                    store.save_object(txn, Object::new("Orbit", "o")),
                    Err(CoreError::InvalidPolicy { .. })
                ));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn object_file_policy_uses_references() {
        let (backend, store) = store_with(StoragePolicy::ObjectFile, Config::default());
        store
            .transaction(|txn| {
                store.save_root(txn, planet("earth", "Earth"))?;
                store.save_root(txn, planet("mars", "Mars"))
            })
            .unwrap();

        assert!(backend.snapshot("Planet/Planet-earth").is_some());
        assert!(backend.snapshot("Planet/Planet-mars").is_some());
        assert!(backend
            .snapshot(references_resource_id("Planet").as_str())
            .is_some());

        let roots = store
            .transaction(|txn| store.load_roots(txn, "Planet"))
            .unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[&ObjectId::new("mars")], planet("mars", "Mars"));

        store
            .transaction(|txn| store.delete_root(txn, "Planet", &ObjectId::new("earth")))
            .unwrap();
        assert!(backend.snapshot("Planet/Planet-earth").is_none());

        let err = store
            .transaction(|txn| store.load_root(txn, "Planet", &ObjectId::new("earth")))
            .unwrap_err();
        assert!(matches!(err, CoreError::ReadNotFound { .. }));
    }

    #[test]
    fn duplicate_object_file_insert_is_refused() {
        let (_, store) = store_with(StoragePolicy::ObjectFile, Config::default());
        store
            .transaction(|txn| store.save_object(txn, planet("earth", "Earth")))
            .unwrap();
        let err = store
            .transaction(|txn| store.save_object(txn, planet("earth", "Terra")))
            .unwrap_err();
        assert!(matches!(err, CoreError::InsertConflict { .. }));
    }

    #[test]
    fn roots_refuse_fragmented_classes() {
        let (_, store) = store_with(StoragePolicy::FragmentedClassFile, Config::default());
        let err = store
            .transaction(|txn| store.save_root(txn, planet("1", "Earth")))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPolicy { .. }));
    }

    #[test]
    fn fragmented_class_spills_into_new_fragment() {
        let config = Config::default().fragment_size(2);
        let (backend, store) = store_with(StoragePolicy::FragmentedClassFile, config.clone());
        store
            .transaction(|txn| {
                store.save_objects(
                    txn,
                    [planet("1", "Mercury"), planet("2", "Venus"), planet("3", "Earth")],
                )
            })
            .unwrap();

        let fragments = store.resources().stored_fragments("Planet").unwrap();
        assert_eq!(fragments.len(), 2);
        assert!(backend.snapshot(index_resource_id("Planet").as_str()).is_some());

        // A fresh store over the same files resolves every id through the index.
        let reopened = Store::with_backend(Arc::clone(&backend) as Arc<dyn StorageBackend>, config).unwrap();
        reopened.register_class(
            "Planet",
            StoragePolicy::FragmentedClassFile,
            PropertyList::new(["name"]),
        );
        reopened
            .transaction(|txn| {
                for (id, name) in [("1", "Mercury"), ("2", "Venus"), ("3", "Earth")] {
                    assert_eq!(
                        reopened.load_object(txn, "Planet", &ObjectId::new(id))?,
                        planet(id, name)
                    );
                }
                assert_eq!(reopened.load_objects(txn, "Planet")?.len(), 3);
                Ok(())
            })
            .unwrap();

        let report = reopened.verify_fragments("Planet").unwrap();
        assert!(report.is_consistent(), "{report:?}");
    }

    #[test]
    fn fragmented_delete_frees_capacity() {
        let config = Config::default().fragment_size(1);
        let (_, store) = store_with(StoragePolicy::FragmentedClassFile, config);
        store
            .transaction(|txn| store.save_object(txn, planet("1", "Mercury")))
            .unwrap();
        store
            .transaction(|txn| store.delete_object(txn, "Planet", &ObjectId::new("1")))
            .unwrap();
        store
            .transaction(|txn| store.save_object(txn, planet("2", "Venus")))
            .unwrap();

        assert_eq!(store.resources().stored_fragments("Planet").unwrap().len(), 1);
        let loaded = store
            .transaction(|txn| store.load_objects(txn, "Planet"))
            .unwrap();
        assert_eq!(loaded, vec![planet("2", "Venus")]);
    }

    #[test]
    fn fragmented_rollback_restores_placement() {
        let config = Config::default().fragment_size(1);
        let (backend, store) = store_with(StoragePolicy::FragmentedClassFile, config);
        let mut txn = store.begin().unwrap();
        store.save_object(&txn, planet("1", "Mercury")).unwrap();
        store.rollback(&mut txn).unwrap();

        assert!(store.resources().stored_fragments("Planet").unwrap().is_empty());
        assert_eq!(backend.write_count(), 0);
        let err = store
            .transaction(|txn| store.load_object(txn, "Planet", &ObjectId::new("1")))
            .unwrap_err();
        assert!(matches!(err, CoreError::ReadNotFound { .. }));
    }

    #[test]
    fn triggers_fire_after_commit() {
        let (_, store) = store_with(StoragePolicy::ClassFile, Config::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.triggers().register("Planet", None, move |kind: ChangeKind, object: &Object| {
            sink.lock().push((kind, object.id.clone()));
        });

        let mut txn = store.begin().unwrap();
        store.save_object(&txn, planet("1", "Earth")).unwrap();
        assert!(store.triggers().wait_idle(Duration::from_secs(5)));
        assert!(seen.lock().is_empty());
        store.commit(&mut txn).unwrap();

        store
            .transaction(|txn| store.delete_object(txn, "Planet", &ObjectId::new("1")))
            .unwrap();
        assert!(store.triggers().wait_idle(Duration::from_secs(5)));
        assert_eq!(
            *seen.lock(),
            vec![
                (ChangeKind::Insert, ObjectId::new("1")),
                (ChangeKind::Delete, ObjectId::new("1")),
            ]
        );
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Moon {
        id: ObjectId,
        name: String,
        radius: i64,
    }

    impl Identifiable for Moon {
        fn id(&self) -> ObjectId {
            self.id.clone()
        }

        fn set_id(&mut self, id: ObjectId) {
            self.id = id;
        }
    }

    impl Persistent for Moon {
        const CLASS: &'static str = "Moon";
        const POLICY: StoragePolicy = StoragePolicy::ObjectFile;

        fn properties() -> PropertyList {
            PropertyList::new(["name", "radius"])
        }

        fn to_properties(&self) -> BTreeMap<String, Value> {
            BTreeMap::from([
                ("name".to_string(), Value::from(self.name.as_str())),
                ("radius".to_string(), Value::Integer(self.radius)),
            ])
        }

        fn from_properties(id: ObjectId, props: &BTreeMap<String, Value>) -> CoreResult<Self> {
            Ok(Self {
                id,
                name: schema::text(Self::CLASS, props, "name")?,
                radius: schema::integer(Self::CLASS, props, "radius")?,
            })
        }
    }

    #[test]
    fn typed_round_trip() {
        let (_, store) = memory_store(Config::default().codec(CodecKind::Json));
        store.register::<Moon>();
        assert_eq!(store.policy("Moon").unwrap(), StoragePolicy::ObjectFile);

        let mut luna = Moon {
            id: ObjectId::new("luna"),
            name: "Luna".into(),
            radius: 1737,
        };
        store.transaction(|txn| store.insert(txn, &luna)).unwrap();

        luna.radius = 1738;
        store.transaction(|txn| store.update(txn, &luna)).unwrap();

        let loaded: Moon = store.transaction(|txn| store.get(txn, &luna.id)).unwrap();
        assert_eq!(loaded, luna);

        store
            .transaction(|txn| store.remove::<Moon>(txn, &luna.id))
            .unwrap();
        let all: Vec<Moon> = store.transaction(|txn| store.all(txn)).unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn load_objects_where_filters() {
        let (_, store) = store_with(StoragePolicy::ClassFile, Config::default());
        store
            .transaction(|txn| {
                store.save_objects(txn, [planet("1", "Mercury"), planet("2", "Mars")])
            })
            .unwrap();
        let with_m = store
            .transaction(|txn| {
                store.load_objects_where(txn, "Planet", |o| {
                    o.get("name").and_then(Value::as_str) == Some("Mars")
                })
            })
            .unwrap();
        assert_eq!(with_m, vec![planet("2", "Mars")]);
    }

    /// Fails writes to one key on demand.
    #[derive(Debug, Default)]
    struct FailingKey {
        inner: InMemoryBackend,
        fail: Mutex<Option<String>>,
    }

    impl StorageBackend for FailingKey {
        fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
            self.inner.read(key)
        }

        fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
            if self.fail.lock().as_deref() == Some(key) {
                return Err(StorageError::unavailable(format!("write to {key} refused")));
            }
            self.inner.write(key, data)
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            self.inner.remove(key)
        }

        fn exists(&self, key: &str) -> StorageResult<bool> {
            self.inner.exists(key)
        }

        fn keys(&self) -> StorageResult<Vec<String>> {
            self.inner.keys()
        }
    }

    #[test]
    fn failed_commit_restores_committed_resources() {
        let backend = Arc::new(FailingKey::default());
        let store = Store::with_backend(
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
            Config::default(),
        )
        .unwrap();
        store.register_class("Alpha", StoragePolicy::ClassFile, PropertyList::any());
        store.register_class("Beta", StoragePolicy::ClassFile, PropertyList::any());
        store
            .transaction(|txn| {
                store.save_object(txn, Object::new("Alpha", "a").with("v", 1i64))?;
                store.save_object(txn, Object::new("Beta", "b").with("v", 1i64))
            })
            .unwrap();
        let alpha_before = backend.inner.snapshot("Alpha");

        *backend.fail.lock() = Some("Beta".to_string());
        let err = store
            .transaction(|txn| {
                store.update_object(txn, Object::new("Alpha", "a").with("v", 2i64))?;
                store.update_object(txn, Object::new("Beta", "b").with("v", 2i64))
            })
            .unwrap_err();
        assert!(err.is_storage_failure());
        assert!(!store.is_invalid());

        assert_eq!(backend.inner.snapshot("Alpha"), alpha_before);
        *backend.fail.lock() = None;
        let (alpha, beta) = store
            .transaction(|txn| {
                Ok((
                    store.load_object(txn, "Alpha", &ObjectId::new("a"))?,
                    store.load_object(txn, "Beta", &ObjectId::new("b"))?,
                ))
            })
            .unwrap();
        assert_eq!(alpha.get("v"), Some(&Value::Integer(1)));
        assert_eq!(beta.get("v"), Some(&Value::Integer(1)));
    }

    #[test]
    fn persists_across_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("store");
        {
            let store = Store::open(&path, Config::default()).unwrap();
            store.register_class("Planet", StoragePolicy::ClassFile, PropertyList::any());
            store
                .transaction(|txn| store.save_object(txn, planet("3", "Earth")))
                .unwrap();
            assert!(matches!(
                Store::open(&path, Config::default()),
                Err(CoreError::DatabaseLocked)
            ));
        }
        let store = Store::open(&path, Config::default()).unwrap();
        store.register_class("Planet", StoragePolicy::ClassFile, PropertyList::any());
        let loaded = store
            .transaction(|txn| store.load_object(txn, "Planet", &ObjectId::new("3")))
            .unwrap();
        assert_eq!(loaded, planet("3", "Earth"));
        assert!(path.join("Planet.cbor").exists());
    }
}
