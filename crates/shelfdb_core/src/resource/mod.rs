//! Transactional resources.
//!
//! A resource is the in-memory and on-disk unit behind one backing file. Every
//! resource a transaction touches takes part in its commit through the
//! [`TransactionalResource`] trait.

mod file;

pub use file::{Resource, ResourceKind};

use crate::cache::CommittedChange;
use crate::error::CoreResult;
use crate::types::{ResourceId, Timestamp, TxnContext};
use std::fmt::Debug;

/// Undo log of one resource in one commit.
///
/// Built while the resource commits; handed back to
/// [`TransactionalResource::rollback_failed_commit`] if a later resource of the
/// same transaction fails.
#[derive(Debug, Clone)]
pub struct CommittedResourceRecord {
    /// The resource that committed.
    pub resource: ResourceId,
    /// Every id the commit changed, in commit order.
    pub changes: Vec<CommittedChange>,
}

impl CommittedResourceRecord {
    /// An undo log with no changes.
    #[must_use]
    pub fn empty(resource: ResourceId) -> Self {
        Self {
            resource,
            changes: Vec::new(),
        }
    }

    /// Returns true if the commit changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A participant in the commit protocol.
pub trait TransactionalResource: Send + Sync + Debug {
    /// The resource id.
    fn id(&self) -> &ResourceId;

    /// Pins the resource for `txn`, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be read or decoded.
    fn prepare(&self, txn: TxnContext) -> CoreResult<()>;

    /// Writes the pending changes of `txn` and unpins the resource.
    ///
    /// A resource without pending changes performs no I/O. On error the
    /// resource is left uncommitted and still pinned; the caller rolls it back.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::StorageIOFailure`] if the file write fails.
    fn commit(&self, txn: TxnContext, stamp: Timestamp) -> CoreResult<CommittedResourceRecord>;

    /// Discards the pending changes of `txn` and unpins the resource.
    fn rollback(&self, txn: TxnContext);

    /// Reverts a commit recorded in `record` and rewrites the file to match.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be rewritten.
    fn rollback_failed_commit(
        &self,
        txn: TxnContext,
        record: &CommittedResourceRecord,
    ) -> CoreResult<()>;

    /// Number of live transactions holding the resource.
    fn pins(&self) -> usize;
}
