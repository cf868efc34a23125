//! Stress tests for shelfdb.
//!
//! These runs verify behavior under heavy load and concurrent access.

use crate::fixtures::{planet, PLANET};
use shelfdb_codec::ObjectId;
use shelfdb_core::{CoreError, Store};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Operations refused with a conflict and retried.
    pub conflicts: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            conflicts: 0,
            duration,
            ops_per_second,
        }
    }

    /// Sets the number of retried conflicts.
    #[must_use]
    pub fn with_conflicts(mut self, conflicts: usize) -> Self {
        self.conflicts = conflicts;
        self
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Conflicts retried: {}", self.conflicts);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Number of distinct objects.
    pub object_count: usize,
    /// Objects saved per transaction in batch runs.
    pub batch_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            threads: 4,
            object_count: 200,
            batch_size: 100,
        }
    }
}

fn populate(store: &Store, count: usize) {
    for i in 0..count {
        let _ = store.transaction(|txn| store.save_object(txn, planet(&i.to_string(), "p")));
    }
}

/// Run a sequential save stress test, one object per transaction.
///
/// The `Planet` class must be registered.
pub fn stress_sequential_saves(store: &Store, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match store.transaction(|txn| store.save_object(txn, planet(&i.to_string(), "p"))) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed save/load/update/delete stress test over a small id space.
///
/// Conflicts are expected here and count as successes: the store refused an
/// operation the model says it must refuse.
pub fn stress_mixed_operations(store: &Store, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = (i % config.object_count).to_string();
        let id = ObjectId::from(key.as_str());

        let result = match i % 4 {
            0 => store.transaction(|txn| store.save_object(txn, planet(&key, "saved"))),
            1 => store
                .transaction(|txn| store.load_object(txn, PLANET, &id))
                .map(drop),
            2 => store.transaction(|txn| store.update_object(txn, planet(&key, "updated"))),
            _ => store.transaction(|txn| store.delete_object(txn, PLANET, &id)),
        };

        match result {
            Ok(()) => successful += 1,
            Err(e) if e.is_conflict() => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent read stress test.
pub fn stress_concurrent_reads(store: Arc<Store>, config: &StressConfig) -> StressTestResult {
    populate(&store, config.object_count);

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let object_count = config.object_count;

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let id = ObjectId::from(((t * ops_per_thread + i) % object_count) as u64);

                    match store.transaction(|txn| store.load_object(txn, PLANET, &id)) {
                        Ok(_) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a concurrent update stress test where every thread rewrites the same
/// few objects, retrying on conflict until its update lands.
pub fn stress_concurrent_updates(store: Arc<Store>, config: &StressConfig) -> StressTestResult {
    populate(&store, config.object_count);

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let conflicts = Arc::clone(&conflicts);
            let object_count = config.object_count;

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let key = (i % object_count).to_string();
                    let name = format!("thread-{t}-{i}");
                    loop {
                        match store.transaction(|txn| store.update_object(txn, planet(&key, &name)))
                        {
                            Ok(()) => {
                                successful.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                            Err(e) if e.is_conflict() => {
                                conflicts.fetch_add(1, Ordering::Relaxed);
                                thread::yield_now();
                            }
                            Err(_) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
    .with_conflicts(conflicts.load(Ordering::Relaxed))
}

/// Run a transaction abort stress test.
pub fn stress_transaction_aborts(store: &Store, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        // Every other transaction fails on purpose
        let should_fail = i % 2 == 0;

        let result = store.transaction(|txn| {
            store.save_object(txn, planet(&i.to_string(), "p"))?;

            if should_fail {
                Err(CoreError::invalid_operation("intentional"))
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a large transaction stress test.
pub fn stress_large_transactions(store: &Store, config: &StressConfig) -> StressTestResult {
    let batch_size = config.batch_size.max(1);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for batch in 0..(config.operations / batch_size) {
        let result = store.transaction(|txn| {
            store.save_objects(
                txn,
                (0..batch_size).map(|i| planet(&(batch * batch_size + i).to_string(), "p")),
            )
        });

        match result {
            Ok(()) => successful += batch_size,
            Err(_) => failed += batch_size,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}
