//! A dynamically-growing, self-terminating parallel work queue.
//!
//! This is the recursive engine behind the opener phase, the path-scan
//! phase and the classfile-scan phase: `run_work_queue` drains
//! `initial_units` by running `processor` for each one on a bounded thread
//! pool, and `processor` may itself discover more units (a manifest
//! cross-reference, an upward-closure reference) and add them through the
//! `WorkQueueHandle` it is given. The queue drains — and `run_work_queue`
//! returns — once there is nothing pending and no worker active, which is
//! exactly what `rayon::scope` already guarantees for us: every `spawn`
//! inside the scope is joined before the scope itself returns, however
//! deep the recursion goes. The `pending`/`active` counters kept alongside
//! are not load-bearing for termination; they exist so that a caller (or a
//! test) can observe queue depth without ending the scan to do so.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cancel::InterruptionMonitor;
use crate::errors::{Result, ResultExt};

#[derive(Default)]
pub struct WorkQueueStats {
    pending: AtomicUsize,
    active: AtomicUsize,
}

impl WorkQueueStats {
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_drained(&self) -> bool {
        self.pending() == 0 && self.active() == 0
    }
}

/// The per-unit callback. Takes ownership of the unit and a handle back
/// into the queue so it can schedule follow-up units before returning.
pub type Processor<T> = dyn Fn(T, &WorkQueueHandle<T>) -> Result<()> + Send + Sync;

/// Handed to `processor` for the duration of one unit. Adding work through
/// this handle is safe from any worker and is visible to any idle one.
pub struct WorkQueueHandle<'a, T> {
    scope: &'a rayon::Scope<'a>,
    processor: Arc<Processor<T>>,
    monitor: Arc<InterruptionMonitor>,
    stats: Arc<WorkQueueStats>,
}

impl<'a, T: Send + 'static> WorkQueueHandle<'a, T> {
    /// Schedules additional units for processing. Each one runs through the
    /// same `processor`, recursively able to add more work of its own.
    pub fn add_work_units(&self, units: impl IntoIterator<Item = T>) {
        for unit in units {
            spawn_unit(
                self.scope,
                unit,
                self.processor.clone(),
                self.monitor.clone(),
                self.stats.clone(),
            );
        }
    }

    pub fn add_work_unit(&self, unit: T) {
        self.add_work_units(std::iter::once(unit));
    }

    pub fn monitor(&self) -> &InterruptionMonitor {
        &self.monitor
    }

    pub fn stats(&self) -> &WorkQueueStats {
        &self.stats
    }
}

fn spawn_unit<'scope, T: Send + 'scope>(
    scope: &rayon::Scope<'scope>,
    unit: T,
    processor: Arc<Processor<T>>,
    monitor: Arc<InterruptionMonitor>,
    stats: Arc<WorkQueueStats>,
) {
    stats.pending.fetch_add(1, Ordering::SeqCst);
    scope.spawn(move |scope| {
        stats.pending.fetch_sub(1, Ordering::SeqCst);

        // Cooperative cancellation checkpoint: abandon the unit without
        // running it if another worker has already tripped the monitor.
        if monitor.check().is_err() {
            return;
        }

        stats.active.fetch_add(1, Ordering::SeqCst);
        let handle = WorkQueueHandle {
            scope,
            processor: processor.clone(),
            monitor: monitor.clone(),
            stats: stats.clone(),
        };
        if let Err(err) = processor(unit, &handle) {
            monitor.trip(err.to_string());
        }
        stats.active.fetch_sub(1, Ordering::SeqCst);
    });
}

/// Runs `processor` over `initial_units` and everything they schedule,
/// using up to `parallelism` worker threads (clamped to at least 1).
/// Returns once the queue has drained. If any processor invocation fails,
/// or the monitor is tripped from elsewhere, the first cause is returned
/// here; later failures are only logged.
pub fn run_work_queue<T, F>(
    initial_units: Vec<T>,
    parallelism: usize,
    monitor: Arc<InterruptionMonitor>,
    processor: F,
) -> Result<()>
where
    T: Send + 'static,
    F: Fn(T, &WorkQueueHandle<T>) -> Result<()> + Send + Sync + 'static,
{
    let parallelism = parallelism.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism)
        .build()
        .chain_err(|| "failed to build work queue thread pool")?;

    let stats = Arc::new(WorkQueueStats::default());
    let processor: Arc<Processor<T>> = Arc::new(processor);

    pool.install(|| {
        rayon::scope(|scope| {
            for unit in initial_units {
                spawn_unit(
                    scope,
                    unit,
                    processor.clone(),
                    monitor.clone(),
                    stats.clone(),
                );
            }
        });
    });

    monitor.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn drains_recursively_added_work() {
        // Each unit `n > 0` schedules `n - 1`, so starting from 5 should
        // process 6 units in total (5, 4, 3, 2, 1, 0).
        let processed = Arc::new(StdAtomicUsize::new(0));
        let monitor = Arc::new(InterruptionMonitor::new());
        let processed_ref = processed.clone();

        run_work_queue(vec![5usize], 2, monitor, move |n, handle| {
            processed_ref.fetch_add(1, Ordering::SeqCst);
            if n > 0 {
                handle.add_work_unit(n - 1);
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(processed.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn first_failure_becomes_the_result() {
        let monitor = Arc::new(InterruptionMonitor::new());
        let result = run_work_queue(vec![1, 2, 3], 4, monitor, |n, _handle| {
            if n == 2 {
                Err(crate::errors::ErrorKind::WorkerPanic(format!("unit {n} failed")).into())
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn single_threaded_mode_still_drains() {
        let processed = Arc::new(StdAtomicUsize::new(0));
        let monitor = Arc::new(InterruptionMonitor::new());
        let processed_ref = processed.clone();
        run_work_queue(vec![1, 2, 3, 4], 1, monitor, move |_n, _handle| {
            processed_ref.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(processed.load(Ordering::SeqCst), 4);
    }

    /// §4.1 "Remaining pending units are discarded", §8 "Cancellation
    /// promptness": once one unit trips the monitor, units still pending
    /// must abandon at their next cooperative check (`spawn_unit`'s
    /// `monitor.check()` before invoking `processor`) rather than run to
    /// completion. Each surviving unit sleeps briefly so the early failure
    /// has a real chance to trip the monitor before most of the queue has
    /// already run — without that, a fast enough processor could drain
    /// everything before cancellation had any pending work left to abandon.
    #[test]
    fn cancellation_abandons_units_still_pending() {
        let total = 500usize;
        let ran = Arc::new(StdAtomicUsize::new(0));
        let monitor = Arc::new(InterruptionMonitor::new());
        let ran_ref = ran.clone();

        let result = run_work_queue((0..total).collect(), 4, monitor, move |n, _handle| {
            if n == 0 {
                return Err(crate::errors::ErrorKind::WorkerPanic("boom".to_string()).into());
            }
            ran_ref.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(())
        });

        assert!(result.is_err());
        let completed = ran.load(Ordering::SeqCst);
        assert!(
            completed < total,
            "expected cancellation to abandon some of the {total} pending units, but {completed} ran"
        );
    }
}
