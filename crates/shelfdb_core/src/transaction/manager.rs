//! Transaction manager.

use crate::error::{CoreError, CoreResult};
use crate::resource::{CommittedResourceRecord, TransactionalResource};
use crate::resources::ResourceManager;
use crate::transaction::state::{Transaction, TransactionState};
use crate::types::{Timestamp, TransactionId, TxnContext};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
struct ManagerState {
    /// Live transactions and the thread that began each.
    live: HashMap<TransactionId, ThreadId>,
    /// Set while a failed commit is being compensated.
    invalid: bool,
}

/// Begins transactions and runs the commit protocol.
///
/// ## Commit
///
/// Commits are serialized by the manager lock. Each registered resource
/// commits in registration order and returns its undo log. If a file write
/// fails, the store is marked invalid so `begin` is refused and the committing
/// thread waits until every other live transaction has finished. The resources
/// that already committed are then reverted from their undo logs and the
/// remaining ones are rolled back. The store reopens and the failure is
/// returned. Any other commit error is reverted the same way without marking
/// the store invalid.
///
/// ## Timestamps
///
/// Start ticks and commit stamps come from one counter advanced under the
/// manager lock, so the record cache's staleness rule is exact.
pub struct TransactionManager {
    /// Next transaction ID.
    next_txid: AtomicU64,
    /// Logical clock.
    clock: AtomicU64,
    /// Whether a thread may own at most one live transaction.
    thread_bound: bool,
    /// Directory that registered resources are released to.
    resources: Arc<ResourceManager>,
    state: Mutex<ManagerState>,
    drained: Condvar,
}

impl TransactionManager {
    /// Creates a new transaction manager.
    pub fn new(resources: Arc<ResourceManager>, thread_bound: bool) -> Self {
        Self {
            next_txid: AtomicU64::new(1),
            clock: AtomicU64::new(0),
            thread_bound,
            resources,
            state: Mutex::new(ManagerState::default()),
            drained: Condvar::new(),
        }
    }

    fn tick(&self) -> Timestamp {
        Timestamp::new(self.clock.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDatabaseState`] while a failed commit is
    /// being compensated, and [`CoreError::DuplicateTransaction`] if thread
    /// binding is on and the calling thread already owns a live transaction.
    pub fn begin(self: &Arc<Self>) -> CoreResult<Transaction> {
        let thread = thread::current().id();
        let mut state = self.state.lock();
        if state.invalid {
            return Err(CoreError::InvalidDatabaseState);
        }
        if self.thread_bound && state.live.values().any(|owner| *owner == thread) {
            return Err(CoreError::DuplicateTransaction {
                thread: format!("{thread:?}"),
            });
        }

        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let start = self.tick();
        state.live.insert(id, thread);
        drop(state);

        debug!(%id, %start, "began transaction");
        Ok(Transaction::new(id, start, thread, Arc::clone(self)))
    }

    /// Commits a transaction.
    ///
    /// Every registered resource is released whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDatabaseState`] if the store was
    /// compensating another commit (the transaction is rolled back), or the
    /// failure of the first resource that could not commit after compensation
    /// has run.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        let ctx = txn.ctx();
        let resources = txn.take_resources();

        let outcome = {
            let mut state = self.state.lock();
            state.live.remove(&ctx.id);
            if state.invalid {
                Self::rollback_all(&resources, ctx);
                Err(CoreError::InvalidDatabaseState)
            } else {
                let stamp = self.tick();
                match Self::commit_all(&resources, ctx, stamp) {
                    Ok(()) => Ok(()),
                    Err((committed, err)) if !err.is_storage_failure() => {
                        warn!(id = %ctx.id, error = %err, "commit refused; reverting");
                        Self::compensate(&resources, &committed, ctx);
                        Err(err)
                    }
                    Err((committed, err)) => {
                        error!(id = %ctx.id, error = %err, "commit failed; compensating");
                        state.invalid = true;
                        let me = thread::current().id();
                        while state.live.values().any(|owner| *owner != me) {
                            self.drained.wait(&mut state);
                        }
                        Self::compensate(&resources, &committed, ctx);
                        state.invalid = false;
                        Err(err)
                    }
                }
            }
        };

        txn.set_state(if outcome.is_ok() {
            TransactionState::Committed
        } else {
            TransactionState::Aborted
        });
        self.release_all(&resources);
        if outcome.is_ok() {
            debug!(id = %ctx.id, resources = resources.len(), "committed transaction");
        }
        outcome
    }

    /// Commits resources in order, stopping at the first failure. On failure
    /// returns the undo logs of the resources that did commit.
    fn commit_all(
        resources: &[Arc<dyn TransactionalResource>],
        ctx: TxnContext,
        stamp: Timestamp,
    ) -> Result<(), (Vec<CommittedResourceRecord>, CoreError)> {
        let mut committed = Vec::with_capacity(resources.len());
        for resource in resources {
            match resource.commit(ctx, stamp) {
                Ok(record) => committed.push(record),
                Err(e) => return Err((committed, e)),
            }
        }
        Ok(())
    }

    /// Reverts the committed prefix and rolls back the rest.
    fn compensate(
        resources: &[Arc<dyn TransactionalResource>],
        committed: &[CommittedResourceRecord],
        ctx: TxnContext,
    ) {
        for (resource, record) in resources.iter().zip(committed) {
            if let Err(e) = resource.rollback_failed_commit(ctx, record) {
                error!(resource = %resource.id(), error = %e, "could not revert committed resource");
            }
        }
        Self::rollback_all(&resources[committed.len()..], ctx);
    }

    fn rollback_all(resources: &[Arc<dyn TransactionalResource>], ctx: TxnContext) {
        for resource in resources {
            resource.rollback(ctx);
        }
    }

    fn release_all(&self, resources: &[Arc<dyn TransactionalResource>]) {
        for resource in resources {
            self.resources.release(resource.id());
        }
        let state = self.state.lock();
        if state.invalid {
            self.drained.notify_all();
        }
        if state.live.is_empty() {
            self.resources.forget_commit_stamps();
        }
    }

    /// Rolls back a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active.
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        let ctx = txn.ctx();
        let resources = txn.take_resources();

        Self::rollback_all(&resources, ctx);
        self.state.lock().live.remove(&ctx.id);
        txn.set_state(TransactionState::Aborted);
        self.release_all(&resources);

        debug!(id = %ctx.id, "rolled back transaction");
        Ok(())
    }

    /// Number of live transactions.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Returns true while a failed commit is being compensated.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.state.lock().invalid
    }

    /// Returns the last tick drawn from the clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txid", &self.next_txid.load(Ordering::SeqCst))
            .field("clock", &self.clock.load(Ordering::SeqCst))
            .field("thread_bound", &self.thread_bound)
            .finish_non_exhaustive()
    }
}
