//! # Leader Tracker
//!
//! Ownership of shared resources within a namespace, persisted in one Secret per
//! resource family (`olo-managed-leader-tracking-<family>`).
//!
//! The record is a set of parallel columns (`names`, `owners`, `paths`, `pathIndices`,
//! `subleases`). Exactly one application instance owns each `(name, pathIndex)` pair and
//! an instance owns at most one entry per family. Writes replace the whole Secret using
//! its `resourceVersion`, so concurrent operators lose the race with a conflict and retry
//! on requeue.
//!
//! The election rules live in [`record`] and are free of Kubernetes I/O; [`store`] binds
//! them to the API server.

pub mod record;
pub mod secret;
pub mod store;

pub use record::{
    is_sublease_expired, DiscoveredResource, LeaderDecision, LeaderEntry, LeaderMetadata,
    LeaderTracker,
};
pub use store::LeaderTrackerStore;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use thiserror::Error;

/// Leader tracker errors
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The tracking Secret does not exist
    #[error("leader tracker {name} not found")]
    NotFound { name: String },

    /// The tracking Secret failed validation and was deleted
    #[error("leader tracker {name} was out of sync and has been deleted: {reason}")]
    OutOfSync { name: String, reason: String },

    /// The tracking Secret was written against another tree version and has been deleted
    #[error("leader tracker {name} was written for version {found}, expected {expected}; rebuilding")]
    Outdated {
        name: String,
        found: String,
        expected: String,
    },

    /// Another writer updated the Secret first
    #[error("leader tracker {name} was modified concurrently")]
    Conflict { name: String },

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// When foreign owners may be evicted on the basis of their sublease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubleaseEviction {
    /// Subleases are recorded but never acted on
    #[default]
    Never,
    /// Owners whose sublease is older than the threshold are evicted on the next write
    Expired { threshold_secs: i64 },
}

/// Process-wide locks serialising local read-modify-write cycles per `<namespace>/<family>`
static TRACKER_LOCKS: LazyLock<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

pub(crate) fn tracker_lock(namespace: &str, family: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = TRACKER_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(
        locks
            .entry(format!("{namespace}/{family}"))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
    )
}

/// Name of the tracking Secret for a family
pub fn tracker_secret_name(family: &str) -> String {
    format!("{}{family}", crate::constants::LEADER_TRACKER_PREFIX)
}
