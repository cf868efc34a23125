//! Commit triggers.
//!
//! Triggers are callbacks registered per class that run after a commit has
//! written its files. Dispatch is fire-and-forget: notifications are queued to
//! a worker thread, the committing transaction never waits for them, and a
//! panicking trigger is logged and otherwise ignored.
//!
//! # Usage
//!
//! ```rust,ignore
//! use shelfdb_core::{ChangeKind, Store};
//!
//! let store = Store::open_in_memory()?;
//! store.triggers().register("Planet", Some(ChangeKind::Insert), |kind, planet| {
//!     println!("{kind}: {}", planet.id);
//! });
//! ```

use crate::cache::ChangeKind;
use parking_lot::{Condvar, Mutex, RwLock};
use shelfdb_codec::Object;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// A callback run after a committed change.
pub trait Trigger: Send + Sync {
    /// Called with the kind of change and the affected object. For deletes the
    /// object is the value that was removed.
    fn notify(&self, kind: ChangeKind, object: &Object);
}

impl<F> Trigger for F
where
    F: Fn(ChangeKind, &Object) + Send + Sync,
{
    fn notify(&self, kind: ChangeKind, object: &Object) {
        self(kind, object);
    }
}

struct Registration {
    kind: Option<ChangeKind>,
    trigger: Arc<dyn Trigger>,
}

struct Job {
    trigger: Arc<dyn Trigger>,
    kind: ChangeKind,
    object: Object,
}

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Registry and asynchronous dispatcher of triggers.
pub struct TriggerManager {
    registry: RwLock<HashMap<String, Vec<Registration>>>,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<Pending>,
}

impl TriggerManager {
    /// Creates a manager with no triggers. The worker thread starts on the
    /// first notification.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            pending: Arc::new(Pending::default()),
        }
    }

    /// Registers a trigger for `class`. `kind = None` listens to every kind.
    pub fn register<T>(&self, class: impl Into<String>, kind: Option<ChangeKind>, trigger: T)
    where
        T: Trigger + 'static,
    {
        self.registry
            .write()
            .entry(class.into())
            .or_default()
            .push(Registration {
                kind,
                trigger: Arc::new(trigger),
            });
    }

    /// Removes every trigger of `class`, returning how many were removed.
    pub fn clear(&self, class: &str) -> usize {
        self.registry.write().remove(class).map_or(0, |r| r.len())
    }

    /// Number of triggers registered for `class`.
    #[must_use]
    pub fn count(&self, class: &str) -> usize {
        self.registry.read().get(class).map_or(0, Vec::len)
    }

    /// Queues notifications for every trigger of the object's class that
    /// listens to `kind`.
    pub fn notify(&self, kind: ChangeKind, object: &Object) {
        let triggers: Vec<Arc<dyn Trigger>> = match self.registry.read().get(&object.class) {
            Some(registrations) => registrations
                .iter()
                .filter(|r| r.kind.map_or(true, |k| k == kind))
                .map(|r| Arc::clone(&r.trigger))
                .collect(),
            None => return,
        };

        for trigger in triggers {
            self.submit(Job {
                trigger,
                kind,
                object: object.clone(),
            });
        }
    }

    fn submit(&self, job: Job) {
        let mut sender = self.sender.lock();
        if sender.is_none() {
            match self.spawn_worker() {
                Ok(tx) => *sender = Some(tx),
                Err(e) => {
                    error!(error = %e, "failed to start trigger worker; notification dropped");
                    return;
                }
            }
        }
        let Some(tx) = sender.as_ref() else {
            return;
        };
        self.pending.add();
        if tx.send(job).is_err() {
            self.pending.done();
            warn!("trigger worker stopped; notification dropped");
        }
    }

    fn spawn_worker(&self) -> std::io::Result<Sender<Job>> {
        let (tx, rx) = mpsc::channel::<Job>();
        let pending = Arc::clone(&self.pending);
        let handle = thread::Builder::new()
            .name("shelfdb-triggers".to_string())
            .spawn(move || {
                for job in rx {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        job.trigger.notify(job.kind, &job.object);
                    }));
                    if outcome.is_err() {
                        warn!(
                            class = %job.object.class,
                            id = %job.object.id,
                            kind = %job.kind,
                            "trigger panicked"
                        );
                    }
                    pending.done();
                }
                debug!("trigger worker exiting");
            })?;
        *self.worker.lock() = Some(handle);
        Ok(tx)
    }

    /// Blocks until every queued notification has run, or `timeout` elapses.
    /// Returns true if the queue drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut count = self.pending.count.lock();
        if *count == 0 {
            return true;
        }
        let result = self
            .pending
            .idle
            .wait_while_for(&mut count, |c| *c > 0, timeout);
        !result.timed_out()
    }
}

impl Default for TriggerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TriggerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerManager")
            .field("classes", &self.registry.read().len())
            .finish_non_exhaustive()
    }
}

impl Drop for TriggerManager {
    fn drop(&mut self) {
        self.sender.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("trigger worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn planet(id: &str) -> Object {
        Object::new("Planet", id)
    }

    #[test]
    fn notifies_registered_trigger() {
        let manager = TriggerManager::new();
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        manager.register("Planet", None, move |kind: ChangeKind, o: &Object| {
            tx.lock().send((kind, o.id.clone())).unwrap();
        });

        manager.notify(ChangeKind::Insert, &planet("1"));

        let (kind, id) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(kind, ChangeKind::Insert);
        assert_eq!(id.as_str(), "1");
    }

    #[test]
    fn filters_by_kind_and_class() {
        let manager = TriggerManager::new();
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        manager.register("Planet", Some(ChangeKind::Delete), move |kind: ChangeKind, _: &Object| {
            tx.lock().send(kind).unwrap();
        });

        manager.notify(ChangeKind::Insert, &planet("1"));
        manager.notify(ChangeKind::Delete, &Object::new("Moon", "1"));
        manager.notify(ChangeKind::Delete, &planet("2"));

        assert!(manager.wait_idle(Duration::from_secs(5)));
        let received: Vec<ChangeKind> = rx.try_iter().collect();
        assert_eq!(received, vec![ChangeKind::Delete]);
    }

    #[test]
    fn panicking_trigger_does_not_stop_worker() {
        let manager = TriggerManager::new();
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        manager.register("Planet", None, |_: ChangeKind, o: &Object| {
            if o.id.as_str() == "boom" {
                panic!("trigger failure");
            }
        });
        manager.register("Planet", None, move |_: ChangeKind, o: &Object| {
            tx.lock().send(o.id.clone()).unwrap();
        });

        manager.notify(ChangeKind::Update, &planet("boom"));
        manager.notify(ChangeKind::Update, &planet("fine"));

        assert!(manager.wait_idle(Duration::from_secs(5)));
        let ids: Vec<String> = rx.try_iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["boom", "fine"]);
    }

    #[test]
    fn clear_removes_registrations() {
        let manager = TriggerManager::new();
        manager.register("Planet", None, |_: ChangeKind, _: &Object| {});
        manager.register("Planet", None, |_: ChangeKind, _: &Object| {});
        assert_eq!(manager.count("Planet"), 2);
        assert_eq!(manager.clear("Planet"), 2);
        assert_eq!(manager.count("Planet"), 0);
    }

    #[test]
    fn idle_without_notifications() {
        let manager = TriggerManager::new();
        assert!(manager.wait_idle(Duration::from_millis(1)));
    }
}
