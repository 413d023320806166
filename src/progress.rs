//! Progress of long-running library operations.
//!
//! Each reconciliation or indexing run gets a [`Progress`] handle registered
//! in a [`ProgressRegistry`] under a short id, so a caller can poll how many
//! images are done while the run is still going. Finished runs stay pollable
//! until [`FINISHED_KEPT`] newer runs have finished.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const FINISHED_KEPT: usize = 16;

/// Counters of one run.
#[derive(Debug)]
pub struct Progress {
    id: String,
    seq: usize,
    total: AtomicUsize,
    done: AtomicUsize,
    failed: AtomicUsize,
    finished: AtomicBool,
}

/// Point-in-time copy of a [`Progress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressStat {
    pub id: String,
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub finished: bool,
}

impl Progress {
    fn new(seq: usize) -> Self {
        Self {
            id: format!("run-{seq:04}"),
            seq,
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Announce `n` more items.
    pub fn add(&self, n: usize) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn done(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    /// An item finished with an error. It still counts as done.
    pub fn fail(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.done();
    }

    pub fn end(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn stat(&self) -> ProgressStat {
        ProgressStat {
            id: self.id.clone(),
            total: self.total.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            finished: self.is_finished(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ProgressRegistry {
    runs: Mutex<HashMap<String, Arc<Progress>>>,
    counter: AtomicUsize,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run and return its handle. Evicts the oldest finished
    /// runs beyond [`FINISHED_KEPT`].
    pub fn start(&self) -> Arc<Progress> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let progress = Arc::new(Progress::new(seq));
        let mut runs = self.lock();

        let mut finished: Vec<(usize, String)> = runs
            .values()
            .filter(|p| p.is_finished())
            .map(|p| (p.seq, p.id.clone()))
            .collect();
        if finished.len() > FINISHED_KEPT {
            finished.sort_unstable();
            let stale = finished.len() - FINISHED_KEPT;
            for (_, id) in finished.drain(..stale) {
                runs.remove(&id);
            }
        }

        runs.insert(progress.id.clone(), Arc::clone(&progress));
        progress
    }

    pub fn get(&self, id: &str) -> Option<ProgressStat> {
        self.lock().get(id).map(|p| p.stat())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Progress>>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
