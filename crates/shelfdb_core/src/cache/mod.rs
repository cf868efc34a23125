//! Per-resource versioned record cache.
//!
//! The cache holds one [`record::Record`] per object id and an index of the ids
//! each transaction has changed. Reads follow snapshot isolation: a pending
//! change is only visible to the transaction that owns it. Writes use
//! optimistic concurrency: a transaction may only change a record whose last
//! commit happened before it started.

mod record;

use crate::error::{ConflictReason, CoreError, CoreResult};
use crate::types::{ResourceId, Timestamp, TransactionId, TxnContext};
use record::{Change, Record};
use shelfdb_codec::{Object, ObjectId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Kind of a committed change, as reported to triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A new object was stored.
    Insert,
    /// An existing object was replaced.
    Update,
    /// An object was removed.
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => f.write_str("insert"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// One id changed by a commit.
///
/// `subject` is the object triggers receive: the new value for inserts and
/// updates, the removed value for deletes. `after` is what the commit wrote.
/// The record as it stood before the transaction is kept so the change can be
/// reverted by [`RecordCache::restore`].
#[derive(Debug, Clone)]
pub struct CommittedChange {
    /// The changed id.
    pub id: ObjectId,
    /// What happened to it.
    pub kind: ChangeKind,
    /// Object reported to triggers.
    pub subject: Option<Object>,
    /// Committed value after the change; `None` for deletes.
    pub after: Option<Object>,
    prior: Option<Record>,
}

impl CommittedChange {
    /// The committed value before the transaction, if the id existed.
    #[must_use]
    pub fn before(&self) -> Option<&Object> {
        self.prior.as_ref().and_then(|r| r.value.as_ref())
    }
}

/// Versioned records of one resource.
#[derive(Debug)]
pub struct RecordCache {
    resource: ResourceId,
    records: BTreeMap<ObjectId, Record>,
    changes: HashMap<TransactionId, BTreeSet<ObjectId>>,
}

impl RecordCache {
    /// Creates an empty cache for `resource`.
    #[must_use]
    pub fn new(resource: ResourceId) -> Self {
        Self {
            resource,
            records: BTreeMap::new(),
            changes: HashMap::new(),
        }
    }

    /// Replaces the content with freshly read records.
    pub fn load(&mut self, objects: impl IntoIterator<Item = Object>) {
        self.load_stamped(objects, &HashMap::new());
    }

    /// Replaces the content with freshly read records, restoring the commit
    /// stamps a previous load of the same file handed out.
    pub fn load_stamped(
        &mut self,
        objects: impl IntoIterator<Item = Object>,
        stamps: &HashMap<ObjectId, Timestamp>,
    ) {
        self.records.clear();
        self.changes.clear();
        for object in objects {
            let id = object.id.clone();
            let record = match stamps.get(&object.id) {
                Some(stamp) => Record::loaded_at(object, *stamp),
                None => Record::loaded(object),
            };
            self.records.insert(id, record);
        }
    }

    /// Commit stamps of every committed record.
    #[must_use]
    pub fn commit_stamps(&self) -> HashMap<ObjectId, Timestamp> {
        self.records
            .iter()
            .filter(|(_, record)| record.is_committed())
            .map(|(id, record)| (id.clone(), record.commit_stamp))
            .collect()
    }

    /// Number of cached records, including uncommitted inserts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no record is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every value visible to `ctx`, keyed by id.
    #[must_use]
    pub fn read_all(&self, ctx: TxnContext) -> BTreeMap<ObjectId, Object> {
        self.records
            .iter()
            .filter_map(|(id, record)| record.visible(ctx).map(|v| (id.clone(), v.clone())))
            .collect()
    }

    /// The value of `id` visible to `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadNotFound`] if nothing is visible.
    pub fn read(&self, id: &ObjectId, ctx: TxnContext) -> CoreResult<Object> {
        self.records
            .get(id)
            .and_then(|record| record.visible(ctx))
            .cloned()
            .ok_or_else(|| CoreError::read_not_found(&self.resource, id))
    }

    /// Returns true if `id` is visible to `ctx`.
    #[must_use]
    pub fn contains(&self, id: &ObjectId, ctx: TxnContext) -> bool {
        self.records
            .get(id)
            .is_some_and(|record| record.visible(ctx).is_some())
    }

    /// Stages an insert owned by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InsertConflict`] if any record exists for the id.
    pub fn insert(&mut self, value: Object, ctx: TxnContext) -> CoreResult<()> {
        if let Some(record) = self.records.get(&value.id) {
            let reason = if record.is_owned_by(ctx.id) {
                match record.change {
                    Change::Delete => ConflictReason::DeletedInTransaction,
                    Change::Insert => ConflictReason::InsertedInTransaction,
                    _ => ConflictReason::AlreadyExists,
                }
            } else if record.owner.is_some() {
                ConflictReason::OwnedByOther
            } else {
                ConflictReason::AlreadyExists
            };
            return Err(CoreError::InsertConflict {
                id: value.id,
                reason,
            });
        }

        let id = value.id.clone();
        self.records
            .insert(id.clone(), Record::inserted(value, ctx.id));
        self.changes.entry(ctx.id).or_default().insert(id);
        Ok(())
    }

    /// Stages an update owned by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UpdateConflict`] if the id is unknown, deleted
    /// earlier in this transaction, owned by another transaction, or committed
    /// after `ctx` started.
    pub fn update(&mut self, value: Object, ctx: TxnContext) -> CoreResult<()> {
        let conflict = |id: &ObjectId, reason| CoreError::UpdateConflict {
            id: id.clone(),
            reason,
        };
        let id = value.id.clone();
        let Some(record) = self.records.get_mut(&id) else {
            return Err(conflict(&id, ConflictReason::NotFound));
        };

        if record.is_owned_by(ctx.id) {
            return match record.change {
                Change::Delete => Err(conflict(&id, ConflictReason::DeletedInTransaction)),
                _ => {
                    record.pending = Some(value);
                    Ok(())
                }
            };
        }
        Self::check_writable(record, ctx).map_err(|reason| conflict(&id, reason))?;

        record.mark(Change::Update, Some(value), ctx.id);
        self.changes.entry(ctx.id).or_default().insert(id);
        Ok(())
    }

    /// Stages a delete owned by `ctx`.
    ///
    /// Deleting an object this transaction inserted drops it outright.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DeleteConflict`] under the same rules as
    /// [`RecordCache::update`], and on a second delete of the same id.
    pub fn delete(&mut self, id: &ObjectId, ctx: TxnContext) -> CoreResult<()> {
        let conflict = |reason| CoreError::DeleteConflict {
            id: id.clone(),
            reason,
        };
        let Some(record) = self.records.get_mut(id) else {
            return Err(conflict(ConflictReason::NotFound));
        };

        if record.is_owned_by(ctx.id) {
            let change = record.change;
            match change {
                Change::Delete => return Err(conflict(ConflictReason::DeletedInTransaction)),
                Change::Insert => {
                    self.records.remove(id);
                    self.forget_change(ctx.id, id);
                    return Ok(());
                }
                _ => {
                    record.mark(Change::Delete, None, ctx.id);
                    return Ok(());
                }
            }
        }
        Self::check_writable(record, ctx).map_err(conflict)?;

        record.mark(Change::Delete, None, ctx.id);
        self.changes.entry(ctx.id).or_default().insert(id.clone());
        Ok(())
    }

    /// Ownership and freshness checks for a record `ctx` does not own.
    fn check_writable(record: &Record, ctx: TxnContext) -> Result<(), ConflictReason> {
        if record.owner.is_some() {
            return Err(ConflictReason::OwnedByOther);
        }
        if record.change == Change::Read && !record.is_committed() {
            return Ok(());
        }
        if record.is_committed() && ctx.start > record.commit_stamp {
            return Ok(());
        }
        Err(ConflictReason::Stale)
    }

    fn forget_change(&mut self, txn: TransactionId, id: &ObjectId) {
        if let Some(ids) = self.changes.get_mut(&txn) {
            ids.remove(id);
            if ids.is_empty() {
                self.changes.remove(&txn);
            }
        }
    }

    /// Returns true if `txn` has pending changes here.
    #[must_use]
    pub fn has_changes(&self, txn: TransactionId) -> bool {
        self.changes.contains_key(&txn)
    }

    /// Committed values, ignoring every pending change.
    #[must_use]
    pub fn committed(&self) -> Vec<Object> {
        self.records.values().filter_map(|r| r.value.clone()).collect()
    }

    /// Applies the pending changes of `txn`, stamping them with `stamp`.
    pub fn commit(&mut self, txn: TransactionId, stamp: Timestamp) -> Vec<CommittedChange> {
        let Some(ids) = self.changes.remove(&txn) else {
            return Vec::new();
        };

        let mut committed = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            if !record.is_owned_by(txn) {
                continue;
            }

            let prior = {
                let mut before = record.clone();
                before.rollback();
                before.value.is_some().then_some(before)
            };
            let kind = match record.change {
                Change::Insert => ChangeKind::Insert,
                Change::Delete => ChangeKind::Delete,
                Change::Update | Change::Read => ChangeKind::Update,
            };
            let subject = record.pending.clone().or_else(|| record.value.clone());

            record.commit(stamp);
            let after = record.value.clone();
            if after.is_none() {
                self.records.remove(&id);
            }

            committed.push(CommittedChange {
                id,
                kind,
                subject,
                after,
                prior,
            });
        }
        committed
    }

    /// Discards the pending changes of `txn`.
    pub fn rollback(&mut self, txn: TransactionId) {
        let Some(ids) = self.changes.remove(&txn) else {
            return;
        };
        for id in ids {
            let remove = match self.records.get_mut(&id) {
                Some(record) if record.is_owned_by(txn) => {
                    record.rollback();
                    record.value.is_none()
                }
                _ => false,
            };
            if remove {
                self.records.remove(&id);
            }
        }
    }

    /// Puts every id of a previous commit back to its pre-transaction record.
    pub fn restore(&mut self, changes: &[CommittedChange]) {
        for change in changes.iter().rev() {
            match &change.prior {
                Some(record) => {
                    self.records.insert(change.id.clone(), record.clone());
                }
                None => {
                    self.records.remove(&change.id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: u64, start: u64) -> TxnContext {
        TxnContext::new(TransactionId::new(id), Timestamp::new(start))
    }

    fn planet(id: &str, name: &str) -> Object {
        Object::new("Planet", id).with("name", name)
    }

    fn loaded(objects: &[Object]) -> RecordCache {
        let mut cache = RecordCache::new(ResourceId::new("Planet"));
        cache.load(objects.iter().cloned());
        cache
    }

    #[test]
    fn loaded_records_are_visible_to_everyone() {
        let cache = loaded(&[planet("1", "Mercury")]);
        assert_eq!(cache.read(&"1".into(), ctx(1, 1)).unwrap(), planet("1", "Mercury"));
        assert_eq!(cache.read_all(ctx(2, 2)).len(), 1);
    }

    #[test]
    fn missing_id_is_read_not_found() {
        let cache = loaded(&[]);
        let err = cache.read(&"9".into(), ctx(1, 1)).unwrap_err();
        assert!(matches!(err, CoreError::ReadNotFound { .. }));
    }

    // === Visibility ===

    #[test]
    fn pending_insert_only_visible_to_owner() {
        let mut cache = loaded(&[]);
        let t1 = ctx(1, 1);
        cache.insert(planet("1", "Venus"), t1).unwrap();

        assert!(cache.contains(&"1".into(), t1));
        assert!(!cache.contains(&"1".into(), ctx(2, 2)));
    }

    #[test]
    fn pending_update_hidden_from_others() {
        let mut cache = loaded(&[planet("1", "Earth")]);
        let t1 = ctx(1, 1);
        cache.update(planet("1", "Terra"), t1).unwrap();

        assert_eq!(cache.read(&"1".into(), t1).unwrap(), planet("1", "Terra"));
        assert_eq!(cache.read(&"1".into(), ctx(2, 2)).unwrap(), planet("1", "Earth"));
    }

    #[test]
    fn pending_delete_hidden_from_owner_only() {
        let mut cache = loaded(&[planet("1", "Pluto")]);
        let t1 = ctx(1, 1);
        cache.delete(&"1".into(), t1).unwrap();

        assert!(!cache.contains(&"1".into(), t1));
        assert!(cache.contains(&"1".into(), ctx(2, 2)));
    }

    #[test]
    fn snapshot_reader_sees_new_value_only_after_commit() {
        let mut cache = loaded(&[planet("1", "Earth")]);
        let reader = ctx(1, 1);
        let writer = ctx(2, 2);

        cache.update(planet("1", "Terra"), writer).unwrap();
        assert_eq!(cache.read(&"1".into(), reader).unwrap(), planet("1", "Earth"));

        cache.commit(writer.id, Timestamp::new(3));
        assert_eq!(cache.read(&"1".into(), reader).unwrap(), planet("1", "Terra"));
    }

    // === Conflicts ===

    #[test]
    fn second_writer_gets_update_conflict() {
        let mut cache = loaded(&[planet("1", "Mars")]);
        cache.update(planet("1", "Ares"), ctx(1, 1)).unwrap();

        let err = cache.update(planet("1", "Red"), ctx(2, 2)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UpdateConflict {
                reason: ConflictReason::OwnedByOther,
                ..
            }
        ));
    }

    #[test]
    fn stale_transaction_cannot_update() {
        let mut cache = loaded(&[planet("1", "Mars")]);
        let t1 = ctx(1, 1);
        let t2 = ctx(2, 2);

        cache.update(planet("1", "Ares"), t2).unwrap();
        cache.commit(t2.id, Timestamp::new(3));

        let err = cache.update(planet("1", "Red"), t1).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UpdateConflict {
                reason: ConflictReason::Stale,
                ..
            }
        ));

        cache.update(planet("1", "Red"), ctx(4, 4)).unwrap();
    }

    #[test]
    fn stale_transaction_cannot_delete() {
        let mut cache = loaded(&[planet("1", "Mars")]);
        cache.update(planet("1", "Ares"), ctx(2, 2)).unwrap();
        cache.commit(TransactionId::new(2), Timestamp::new(3));

        assert!(matches!(
            cache.delete(&"1".into(), ctx(1, 1)),
            Err(CoreError::DeleteConflict {
                reason: ConflictReason::Stale,
                ..
            })
        ));
    }

    #[test]
    fn reloaded_stamps_keep_staleness() {
        let mut first = loaded(&[planet("1", "Mars"), planet("2", "Venus")]);
        first.update(planet("1", "Ares"), ctx(2, 2)).unwrap();
        first.commit(TransactionId::new(2), Timestamp::new(3));
        let stamps = first.commit_stamps();
        assert_eq!(stamps.len(), 1);

        let mut reloaded = RecordCache::new(ResourceId::new("Planet"));
        reloaded.load_stamped(first.committed(), &stamps);

        assert!(matches!(
            reloaded.update(planet("1", "Red"), ctx(1, 1)),
            Err(CoreError::UpdateConflict {
                reason: ConflictReason::Stale,
                ..
            })
        ));
        reloaded.update(planet("2", "Hesperus"), ctx(1, 1)).unwrap();
        assert_eq!(reloaded.commit_stamps().get(&ObjectId::new("1")), Some(&Timestamp::new(3)));
        reloaded.update(planet("1", "Red"), ctx(4, 4)).unwrap();
    }

    #[test]
    fn unknown_id_conflicts() {
        let mut cache = loaded(&[]);
        assert!(matches!(
            cache.update(planet("1", "x"), ctx(1, 1)),
            Err(CoreError::UpdateConflict {
                reason: ConflictReason::NotFound,
                ..
            })
        ));
        assert!(matches!(
            cache.delete(&"1".into(), ctx(1, 1)),
            Err(CoreError::DeleteConflict {
                reason: ConflictReason::NotFound,
                ..
            })
        ));
    }

    #[test]
    fn insert_conflict_reasons() {
        let mut cache = loaded(&[planet("1", "Earth"), planet("2", "Mars")]);
        let t1 = ctx(1, 1);

        let reason = |r: CoreResult<()>| match r {
            Err(CoreError::InsertConflict { reason, .. }) => reason,
            other => panic!("expected insert conflict, got {other:?}"),
        };

        assert_eq!(
            reason(cache.insert(planet("1", "Earth"), t1)),
            ConflictReason::AlreadyExists
        );

        cache.insert(planet("3", "Venus"), t1).unwrap();
        assert_eq!(
            reason(cache.insert(planet("3", "Venus"), t1)),
            ConflictReason::InsertedInTransaction
        );

        cache.delete(&"2".into(), t1).unwrap();
        assert_eq!(
            reason(cache.insert(planet("2", "Mars"), t1)),
            ConflictReason::DeletedInTransaction
        );

        assert_eq!(
            reason(cache.insert(planet("3", "Venus"), ctx(2, 2))),
            ConflictReason::OwnedByOther
        );
    }

    #[test]
    fn update_after_delete_in_same_transaction_conflicts() {
        let mut cache = loaded(&[planet("1", "Earth")]);
        let t1 = ctx(1, 1);
        cache.delete(&"1".into(), t1).unwrap();

        assert!(matches!(
            cache.update(planet("1", "Terra"), t1),
            Err(CoreError::UpdateConflict {
                reason: ConflictReason::DeletedInTransaction,
                ..
            })
        ));
        assert!(matches!(
            cache.delete(&"1".into(), t1),
            Err(CoreError::DeleteConflict {
                reason: ConflictReason::DeletedInTransaction,
                ..
            })
        ));
    }

    // === Commit and rollback ===

    #[test]
    fn insert_then_delete_has_no_net_effect() {
        let mut cache = loaded(&[]);
        let t1 = ctx(1, 1);
        cache.insert(planet("1", "Ceres"), t1).unwrap();
        cache.delete(&"1".into(), t1).unwrap();

        assert!(!cache.has_changes(t1.id));
        assert!(cache.commit(t1.id, Timestamp::new(2)).is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn update_on_own_insert_stays_an_insert() {
        let mut cache = loaded(&[]);
        let t1 = ctx(1, 1);
        cache.insert(planet("1", "Ceres"), t1).unwrap();
        cache.update(planet("1", "Vesta"), t1).unwrap();

        let changes = cache.commit(t1.id, Timestamp::new(2));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Insert);
        assert_eq!(changes[0].after, Some(planet("1", "Vesta")));
        assert_eq!(changes[0].before(), None);
    }

    #[test]
    fn commit_reports_deleted_value_to_triggers() {
        let mut cache = loaded(&[planet("1", "Pluto")]);
        cache.delete(&"1".into(), ctx(1, 1)).unwrap();

        let changes = cache.commit(TransactionId::new(1), Timestamp::new(2));
        assert_eq!(changes[0].kind, ChangeKind::Delete);
        assert_eq!(changes[0].subject, Some(planet("1", "Pluto")));
        assert_eq!(changes[0].after, None);
        assert!(cache.is_empty());
    }

    #[test]
    fn rollback_restores_state() {
        let mut cache = loaded(&[planet("1", "Earth"), planet("2", "Mars")]);
        let t1 = ctx(1, 1);
        cache.insert(planet("3", "Venus"), t1).unwrap();
        cache.update(planet("1", "Terra"), t1).unwrap();
        cache.delete(&"2".into(), t1).unwrap();

        cache.rollback(t1.id);

        let after = ctx(2, 2);
        assert!(!cache.contains(&"3".into(), after));
        assert_eq!(cache.read(&"1".into(), after).unwrap(), planet("1", "Earth"));
        assert_eq!(cache.read(&"2".into(), after).unwrap(), planet("2", "Mars"));
        assert_eq!(cache.len(), 2);
        assert!(!cache.has_changes(t1.id));
    }

    #[test]
    fn rollback_of_update_then_delete_leaves_record_writable() {
        let mut cache = loaded(&[planet("1", "Earth")]);
        let t1 = ctx(1, 1);
        cache.update(planet("1", "Terra"), t1).unwrap();
        cache.delete(&"1".into(), t1).unwrap();
        cache.rollback(t1.id);

        cache.update(planet("1", "Gaia"), ctx(2, 2)).unwrap();
    }

    #[test]
    fn restore_reverts_a_commit() {
        let mut cache = loaded(&[planet("1", "Earth"), planet("2", "Mars")]);
        let t1 = ctx(1, 1);
        cache.insert(planet("3", "Venus"), t1).unwrap();
        cache.update(planet("1", "Terra"), t1).unwrap();
        cache.delete(&"2".into(), t1).unwrap();
        let changes = cache.commit(t1.id, Timestamp::new(2));

        cache.restore(&changes);

        let mut expected = vec![planet("1", "Earth"), planet("2", "Mars")];
        expected.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(cache.committed(), expected);
        cache.update(planet("1", "Gaia"), ctx(3, 3)).unwrap();
    }

    #[test]
    fn committed_ignores_pending_changes() {
        let mut cache = loaded(&[planet("1", "Earth")]);
        cache.insert(planet("2", "Mars"), ctx(1, 1)).unwrap();
        cache.update(planet("1", "Terra"), ctx(1, 1)).unwrap();
        assert_eq!(cache.committed(), vec![planet("1", "Earth")]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Insert(u8, u8),
            Update(u8, u8),
            Delete(u8),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..6, any::<u8>()).prop_map(|(id, v)| Op::Insert(id, v)),
                (0u8..6, any::<u8>()).prop_map(|(id, v)| Op::Update(id, v)),
                (0u8..6).prop_map(Op::Delete),
            ]
        }

        fn object(id: u8, value: u8) -> Object {
            Object::new("Planet", u64::from(id)).with("v", i64::from(value))
        }

        fn apply(cache: &mut RecordCache, model: &mut BTreeMap<ObjectId, Object>, ops: &[Op], t: TxnContext) {
            for op in ops {
                match op {
                    Op::Insert(id, v) => {
                        let o = object(*id, *v);
                        if cache.insert(o.clone(), t).is_ok() {
                            model.insert(o.id.clone(), o);
                        }
                    }
                    Op::Update(id, v) => {
                        let o = object(*id, *v);
                        if cache.update(o.clone(), t).is_ok() {
                            model.insert(o.id.clone(), o);
                        }
                    }
                    Op::Delete(id) => {
                        let key = ObjectId::from(u64::from(*id));
                        if cache.delete(&key, t).is_ok() {
                            model.remove(&key);
                        }
                    }
                }
                assert_eq!(&cache.read_all(t), model);
            }
        }

        proptest! {
            #[test]
            fn commit_matches_model(
                seed in prop::collection::btree_set(0u8..6, 0..6),
                ops in prop::collection::vec(op(), 0..24),
            ) {
                let initial: Vec<Object> = seed.iter().map(|id| object(*id, 0)).collect();
                let mut cache = loaded(&initial);
                let mut model: BTreeMap<ObjectId, Object> =
                    initial.iter().map(|o| (o.id.clone(), o.clone())).collect();

                let t = ctx(1, 1);
                apply(&mut cache, &mut model, &ops, t);
                cache.commit(t.id, Timestamp::new(2));

                prop_assert_eq!(cache.committed(), model.into_values().collect::<Vec<_>>());
                prop_assert!(!cache.has_changes(t.id));
            }

            #[test]
            fn rollback_restores_loaded_state(
                seed in prop::collection::btree_set(0u8..6, 0..6),
                ops in prop::collection::vec(op(), 0..24),
            ) {
                let initial: Vec<Object> = seed.iter().map(|id| object(*id, 0)).collect();
                let mut cache = loaded(&initial);
                let mut model = BTreeMap::new();
                for o in &initial {
                    model.insert(o.id.clone(), o.clone());
                }

                let t = ctx(1, 1);
                apply(&mut cache, &mut model, &ops, t);
                cache.rollback(t.id);

                prop_assert_eq!(cache.committed(), initial.clone());
                prop_assert_eq!(cache.read_all(ctx(2, 3)).into_values().collect::<Vec<_>>(), initial);
            }
        }
    }
}
