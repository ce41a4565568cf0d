//! # Reconciler Context
//!
//! State shared by every reconcile of the application and trace controllers.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::image::ImagePullCache;
use crate::sharing::SharingAssets;
use crate::worker::WorkerCache;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Backoff progress of one failing resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::with_seconds(5, 600),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconciler context
pub struct Reconciler {
    pub client: Client,
    pub config: ControllerConfig,
    pub assets: Arc<SharingAssets>,
    pub workers: WorkerCache,
    pub image_pulls: ImagePullCache,
    /// Backoff per `<kind>/<namespace>/<name>`
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(client: Client, config: ControllerConfig, assets: Arc<SharingAssets>) -> Self {
        Self {
            client,
            workers: WorkerCache::new(config.worker_cache_max_workers),
            image_pulls: ImagePullCache::new(config.image_pull_state_path.clone()),
            config,
            assets,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Forget the backoff of a resource after a successful reconcile
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}
