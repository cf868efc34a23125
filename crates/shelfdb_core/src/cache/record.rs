//! A single cached record and its state machine.

use crate::types::{Timestamp, TransactionId, TxnContext};
use shelfdb_codec::Object;

/// What the owning transaction is doing to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    Read,
    Insert,
    Update,
    Delete,
}

/// Whether the record's current change has been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordState {
    Undefined,
    Committed,
}

/// Cached state of one object id.
///
/// `value` is the last committed value, `pending` the uncommitted one held by
/// `owner`. The previous change/state slots hold the record as it was before
/// the owning transaction first touched it.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub(crate) value: Option<Object>,
    pub(crate) pending: Option<Object>,
    pub(crate) owner: Option<TransactionId>,
    pub(crate) change: Change,
    pub(crate) state: RecordState,
    pub(crate) commit_stamp: Timestamp,
    previous_change: Change,
    previous_state: RecordState,
}

impl Record {
    /// A record freshly read from the backing file.
    pub(crate) fn loaded(value: Object) -> Self {
        Self {
            value: Some(value),
            pending: None,
            owner: None,
            change: Change::Read,
            state: RecordState::Undefined,
            commit_stamp: Timestamp::ZERO,
            previous_change: Change::Read,
            previous_state: RecordState::Undefined,
        }
    }

    /// A record read from the backing file whose last commit happened at
    /// `stamp` in an earlier life of the resource.
    pub(crate) fn loaded_at(value: Object, stamp: Timestamp) -> Self {
        Self {
            state: RecordState::Committed,
            commit_stamp: stamp,
            previous_state: RecordState::Committed,
            ..Self::loaded(value)
        }
    }

    /// A record created by an uncommitted insert.
    pub(crate) fn inserted(value: Object, txn: TransactionId) -> Self {
        Self {
            value: None,
            pending: Some(value),
            owner: Some(txn),
            change: Change::Insert,
            state: RecordState::Undefined,
            commit_stamp: Timestamp::ZERO,
            previous_change: Change::Read,
            previous_state: RecordState::Undefined,
        }
    }

    pub(crate) fn is_owned_by(&self, txn: TransactionId) -> bool {
        self.owner == Some(txn)
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.state == RecordState::Committed
    }

    /// The value `ctx` sees under snapshot isolation.
    pub(crate) fn visible(&self, ctx: TxnContext) -> Option<&Object> {
        let owned = self.is_owned_by(ctx.id);
        match self.change {
            Change::Read => self.value.as_ref(),
            Change::Update if owned && !self.is_committed() => self.pending.as_ref(),
            Change::Update => self.value.as_ref(),
            Change::Insert if self.is_committed() => self.value.as_ref(),
            Change::Insert if owned => self.pending.as_ref(),
            Change::Insert => None,
            Change::Delete if !self.is_committed() && !owned => self.value.as_ref(),
            Change::Delete => None,
        }
    }

    /// Hands the record to `txn` with a new pending change.
    pub(crate) fn mark(&mut self, change: Change, pending: Option<Object>, txn: TransactionId) {
        if !self.is_owned_by(txn) {
            self.previous_change = self.change;
            self.previous_state = self.state;
        }
        self.owner = Some(txn);
        self.change = change;
        self.state = RecordState::Undefined;
        self.pending = pending;
    }

    /// Applies the pending value.
    pub(crate) fn commit(&mut self, stamp: Timestamp) {
        self.value = self.pending.take();
        self.previous_change = self.change;
        self.previous_state = RecordState::Committed;
        self.state = RecordState::Committed;
        self.commit_stamp = stamp;
        self.owner = None;
    }

    /// Drops the pending value and restores the pre-transaction slots.
    pub(crate) fn rollback(&mut self) {
        self.pending = None;
        self.change = self.previous_change;
        self.state = self.previous_state;
        self.owner = None;
    }
}
