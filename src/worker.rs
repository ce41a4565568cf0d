//! # Worker Cache
//!
//! Admission control for expensive application reconciles.
//!
//! Keys live in two spaces: `worker/<namespace>/<name>` holds a reserved slot and
//! `allowed-worker/<namespace>/<name>` marks an application that released its slot and
//! may pass once more without consuming one.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const WORKER_PREFIX: &str = "worker";
const ALLOWED_WORKER_PREFIX: &str = "allowed-worker";

/// Process-wide slot table
#[derive(Debug)]
pub struct WorkerCache {
    max_workers: usize,
    keys: Mutex<HashSet<String>>,
}

fn worker_key(namespace: &str, name: &str) -> String {
    format!("{WORKER_PREFIX}/{namespace}/{name}")
}

fn allowed_worker_key(namespace: &str, name: &str) -> String {
    format!("{ALLOWED_WORKER_PREFIX}/{namespace}/{name}")
}

impl WorkerCache {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            keys: Mutex::new(HashSet::new()),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Admit `namespace/name`, reserving a slot when one is free
    ///
    /// An application already holding a slot or an allowance is admitted while the table
    /// is within capacity. When `max_workers` (or the cache capacity) drops below the
    /// reserved count, a holder gives its slot back and allowances are refused until the
    /// table shrinks.
    pub fn reserve(&self, namespace: &str, name: &str, max_workers: Option<usize>) -> bool {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let limit = max_workers.unwrap_or(self.max_workers);
        let reserved = keys
            .iter()
            .filter(|k| k.starts_with(&format!("{WORKER_PREFIX}/")))
            .count();
        let worker = worker_key(namespace, name);
        if keys.contains(&worker) {
            if reserved > limit {
                debug!(
                    "Worker cache over capacity ({} reserved, max {}), releasing {}/{}",
                    reserved, limit, namespace, name
                );
                keys.remove(&worker);
                return false;
            }
            return true;
        }
        if keys.contains(&allowed_worker_key(namespace, name)) {
            return reserved <= limit;
        }
        if reserved >= limit {
            debug!("Worker cache full ({} reserved), deferring {}/{}", reserved, namespace, name);
            return false;
        }
        keys.insert(worker);
        true
    }

    /// Free the slot of `namespace/name` and allow its next reconcile through
    pub fn release(&self, namespace: &str, name: &str) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.remove(&worker_key(namespace, name));
        keys.insert(allowed_worker_key(namespace, name));
    }

    /// Drop every key of `namespace/name`
    pub fn forget(&self, namespace: &str, name: &str) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.remove(&worker_key(namespace, name));
        keys.remove(&allowed_worker_key(namespace, name));
    }

    /// Number of reserved slots
    pub fn reserved(&self) -> usize {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|k| k.starts_with(&format!("{WORKER_PREFIX}/")))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_until_full() {
        let cache = WorkerCache::new(2);
        assert!(cache.reserve("ns", "a", None));
        assert!(cache.reserve("ns", "b", None));
        assert!(!cache.reserve("ns", "c", None));
        // Holders are readmitted without a new slot
        assert!(cache.reserve("ns", "a", None));
        assert_eq!(cache.reserved(), 2);
    }

    #[test]
    fn test_release_installs_allowance() {
        let cache = WorkerCache::new(1);
        assert!(cache.reserve("ns", "a", None));
        cache.release("ns", "a");
        assert_eq!(cache.reserved(), 0);
        assert!(cache.reserve("ns", "b", None));
        // a passes on its allowance while b holds the only slot
        assert!(cache.reserve("ns", "a", None));
        assert!(!cache.reserve("ns", "c", None));
    }

    #[test]
    fn test_forget_and_override() {
        let cache = WorkerCache::new(1);
        assert!(cache.reserve("ns", "a", None));
        assert!(cache.reserve("ns", "b", Some(3)));
        cache.forget("ns", "a");
        cache.forget("ns", "b");
        assert_eq!(cache.reserved(), 0);
        assert!(cache.reserve("other", "a", None));
    }

    #[test]
    fn test_shrunk_capacity_rechecks_admitted_keys() {
        let cache = WorkerCache::new(3);
        assert!(cache.reserve("ns", "a", None));
        assert!(cache.reserve("ns", "b", None));
        cache.release("ns", "c");

        // capacity drops to one: a holder over capacity gives its slot back
        assert!(!cache.reserve("ns", "a", Some(1)));
        assert_eq!(cache.reserved(), 1);
        assert!(cache.reserve("ns", "b", Some(1)));
        assert!(cache.reserve("ns", "c", Some(1)));

        // allowances wait while the table is over capacity
        assert!(!cache.reserve("ns", "c", Some(0)));
        assert!(!cache.reserve("ns", "b", Some(0)));
        assert_eq!(cache.reserved(), 0);
        assert!(cache.reserve("ns", "c", Some(0)));
    }
}
