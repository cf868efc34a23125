//! Transaction handle.

use crate::error::{CoreError, CoreResult};
use crate::resource::TransactionalResource;
use crate::transaction::TransactionManager;
use crate::types::{ResourceId, Timestamp, TransactionId, TxnContext};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::warn;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    Aborted,
}

/// An open transaction.
///
/// Returned by [`TransactionManager::begin`] and passed to every store
/// operation. Dropping an active transaction rolls it back.
pub struct Transaction {
    id: TransactionId,
    start: Timestamp,
    thread: ThreadId,
    state: TransactionState,
    resources: Mutex<Vec<Arc<dyn TransactionalResource>>>,
    manager: Arc<TransactionManager>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        start: Timestamp,
        thread: ThreadId,
        manager: Arc<TransactionManager>,
    ) -> Self {
        Self {
            id,
            start,
            thread,
            state: TransactionState::Active,
            resources: Mutex::new(Vec::new()),
            manager,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the tick drawn when the transaction began.
    #[must_use]
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Returns the thread that began the transaction.
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Returns the id and start tick as passed to resources.
    #[must_use]
    pub fn ctx(&self) -> TxnContext {
        TxnContext::new(self.id, self.start)
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Ids of the registered resources, in registration order.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.lock().iter().map(|r| r.id().clone()).collect()
    }

    /// Registers `resource`, preparing it on first registration.
    /// Returns false if it was already registered.
    pub(crate) fn register(&self, resource: Arc<dyn TransactionalResource>) -> CoreResult<bool> {
        self.ensure_active()?;
        let mut resources = self.resources.lock();
        if resources.iter().any(|r| r.id() == resource.id()) {
            return Ok(false);
        }
        resource.prepare(self.ctx())?;
        resources.push(resource);
        Ok(true)
    }

    pub(crate) fn take_resources(&self) -> Vec<Arc<dyn TransactionalResource>> {
        std::mem::take(&mut *self.resources.lock())
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(CoreError::TransactionNotActive {
                id: self.id.as_u64(),
            })
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("state", &self.state)
            .field("resources", &self.resources.lock().len())
            .finish_non_exhaustive()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            warn!(id = %self.id, "transaction dropped while active; rolling back");
            let manager = Arc::clone(&self.manager);
            if let Err(e) = manager.rollback(self) {
                warn!(id = %self.id, error = %e, "rollback on drop failed");
            }
        }
    }
}
