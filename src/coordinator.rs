//! Single-flight guard for tree reconciliation.
//!
//! At most one reconciliation (or tree-mutating admin operation) runs at a
//! time. A caller asking for a reconciliation waits a short grace window for
//! a running one to finish; if it is still running afterwards the request is
//! refused with [`AlreadyRunning`] rather than queued. Admin mutations use
//! [`ReconcileCoordinator::acquire`] and simply wait their turn.
//!
//! Holding the guard does not lock the tree itself: readers keep working
//! while a reconciliation runs.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("an update is already running")]
pub struct AlreadyRunning;

#[derive(Debug)]
pub struct ReconcileCoordinator {
    running: Mutex<bool>,
    released: Condvar,
    grace: Duration,
}

/// Proof of holding the coordinator. Released on drop.
#[must_use = "the coordinator is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReconcileGuard<'a> {
    coordinator: &'a ReconcileCoordinator,
}

impl ReconcileCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            running: Mutex::new(false),
            released: Condvar::new(),
            grace,
        }
    }

    /// Acquire, waiting at most the grace window.
    pub fn try_acquire(&self) -> Result<ReconcileGuard<'_>, AlreadyRunning> {
        let deadline = Instant::now() + self.grace;
        let mut running = self.lock();
        while *running {
            let now = Instant::now();
            if now >= deadline {
                return Err(AlreadyRunning);
            }
            running = self
                .released
                .wait_timeout(running, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *running = true;
        Ok(ReconcileGuard { coordinator: self })
    }

    /// Acquire, waiting as long as it takes.
    pub fn acquire(&self) -> ReconcileGuard<'_> {
        let mut running = self.lock();
        while *running {
            running = self
                .released
                .wait(running)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *running = true;
        ReconcileGuard { coordinator: self }
    }

    pub fn is_running(&self) -> bool {
        *self.lock()
    }

    fn release(&self) {
        *self.lock() = false;
        self.released.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ReconcileCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl Drop for ReconcileGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release();
    }
}
