//! Cooperative cancellation shared by every phase of a scan.
//!
//! A single atomic flag plus a stored first cause, read at every phase
//! boundary and every I/O boundary inside a work-queue processor. There is
//! no thread-interruption primitive here: processors poll `check()`
//! explicitly, and the queue itself polls between units.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::errors::{Error, ErrorKind, Result};

/// Tracks whether a scan has been cancelled and the first failure that
/// caused it, if any. Cheap to clone (it is an `Arc` internally at the call
/// site); cheap to check from a hot loop.
#[derive(Default)]
pub struct InterruptionMonitor {
    tripped: AtomicBool,
    // The first recorded cause. Additional failures are logged but not
    // stored here — only the first one becomes the scan's terminal error.
    cause: Mutex<Option<String>>,
}

impl InterruptionMonitor {
    pub fn new() -> Self {
        InterruptionMonitor {
            tripped: AtomicBool::new(false),
            cause: Mutex::new(None),
        }
    }

    /// Trips the monitor, recording `cause` as the first failure if none is
    /// recorded yet. Safe to call concurrently from any number of workers;
    /// only the first call wins the race to set the cause.
    pub fn trip(&self, cause: String) {
        let was_tripped = self.tripped.swap(true, Ordering::SeqCst);
        if !was_tripped {
            let mut guard = self.cause.lock().expect("cancellation mutex poisoned");
            *guard = Some(cause);
        } else {
            log::debug!("suppressing cancellation cause (already tripped): {cause}");
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// The cooperative checkpoint: call this between units and at I/O
    /// boundaries. Returns `Err(Cancelled)` once the monitor has tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_tripped() {
            Err(ErrorKind::Cancelled.into())
        } else {
            Ok(())
        }
    }

    /// Converts a tripped monitor into the scan's terminal result. Called
    /// once after a phase completes to decide whether to continue.
    pub fn into_result(&self) -> Result<()> {
        if !self.is_tripped() {
            return Ok(());
        }
        let cause = self
            .cause
            .lock()
            .expect("cancellation mutex poisoned")
            .clone();
        match cause {
            Some(detail) => Err(Error::from(ErrorKind::WorkerPanic(detail))),
            None => Err(ErrorKind::Cancelled.into()),
        }
    }
}
