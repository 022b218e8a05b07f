//! Shared pipeline limits.
//!
//! A merge statement with a row limit publishes a shared countdown before
//! running its source query; every per-row crawl invocation inside that
//! query decrements it after emitting and stops fetching once it latches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Remaining-row countdown with a latched stop flag.
#[derive(Debug)]
pub struct PipelineLimit {
    remaining: AtomicI64,
    stopped: AtomicBool,
}

impl PipelineLimit {
    pub fn new(limit: i64) -> Self {
        Self {
            remaining: AtomicI64::new(limit),
            stopped: AtomicBool::new(false),
        }
    }

    /// Decrement after emitting a row. Latches `stopped` once the counter
    /// reaches zero; once set it stays set.
    pub fn decrement(&self) -> i64 {
        let remaining = self.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining <= 0 {
            self.stopped.store(true, Ordering::Release);
        }
        remaining
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }
}

/// Process-wide map from database identity to its active pipeline limit.
/// The map is mutex-guarded; the limits themselves are atomics so readers
/// and decrementers never touch the mutex.
#[derive(Default)]
pub struct PipelineRegistry {
    states: Mutex<HashMap<u64, Arc<PipelineLimit>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the limit for a database.
    pub fn init(&self, db_id: u64, limit: i64) {
        let mut states = self.states.lock().expect("pipeline registry mutex");
        states.insert(db_id, Arc::new(PipelineLimit::new(limit)));
    }

    pub fn get(&self, db_id: u64) -> Option<Arc<PipelineLimit>> {
        let states = self.states.lock().expect("pipeline registry mutex");
        states.get(&db_id).cloned()
    }

    pub fn clear(&self, db_id: u64) {
        let mut states = self.states.lock().expect("pipeline registry mutex");
        states.remove(&db_id);
    }
}

/// Process-default registry, used when callers do not supply their own.
pub fn default_registry() -> Arc<PipelineRegistry> {
    static REGISTRY: OnceLock<Arc<PipelineRegistry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| Arc::new(PipelineRegistry::new()))
        .clone()
}
