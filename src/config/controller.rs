//! # Controller Configuration
//!
//! Reconciler behaviour loaded from environment variables.

use super::env_var_or_default;
use crate::constants::{
    DEFAULT_APPLICATION_MAX_CONCURRENT_RECONCILES, DEFAULT_IMAGE_PULL_STATE_PATH,
    DEFAULT_RESYNC_SECS, DEFAULT_SUBLEASE_THRESHOLD_SECS, DEFAULT_TRACE_MAX_CONCURRENT_RECONCILES,
    DEFAULT_WORKER_CACHE_MAX_WORKERS,
};
use crate::leader::SubleaseEviction;
use std::path::PathBuf;
use tracing::warn;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// `WATCH_NAMESPACE`: `None` when unset, empty for every namespace
    pub watch_namespace: Option<String>,
    /// Namespace holding the manager Lease
    pub operator_namespace: String,
    /// Identity used for the manager Lease
    pub pod_name: String,
    /// Directory overriding the built-in assets
    pub assets_dir: Option<PathBuf>,
    /// Pin decision trees to this version or older
    pub tree_version: Option<String>,
    /// Worker cache capacity
    pub worker_cache_max_workers: usize,
    /// Sublease-based eviction of tracker owners
    pub sublease_eviction: SubleaseEviction,
    /// Image-pull state file
    pub image_pull_state_path: PathBuf,
    /// Delete shared resources left without an owner
    pub cleanup_unused_resources: bool,
    pub application_max_concurrent_reconciles: u16,
    pub trace_max_concurrent_reconciles: u16,
    /// Requeue interval after a successful application reconcile
    pub resync_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            operator_namespace: "default".to_string(),
            pod_name: "open-liberty-operator".to_string(),
            assets_dir: None,
            tree_version: None,
            worker_cache_max_workers: DEFAULT_WORKER_CACHE_MAX_WORKERS,
            sublease_eviction: SubleaseEviction::Never,
            image_pull_state_path: PathBuf::from(DEFAULT_IMAGE_PULL_STATE_PATH),
            cleanup_unused_resources: false,
            application_max_concurrent_reconciles: DEFAULT_APPLICATION_MAX_CONCURRENT_RECONCILES,
            trace_max_concurrent_reconciles: DEFAULT_TRACE_MAX_CONCURRENT_RECONCILES,
            resync_secs: DEFAULT_RESYNC_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let threshold_secs =
            env_var_or_default("SUBLEASE_THRESHOLD_SECS", DEFAULT_SUBLEASE_THRESHOLD_SECS);
        let sublease_eviction = std::env::var("SUBLEASE_EVICTION")
            .map(|v| parse_sublease_eviction(&v, threshold_secs))
            .unwrap_or_default();
        Self {
            watch_namespace: std::env::var("WATCH_NAMESPACE").ok(),
            operator_namespace: non_empty_env("OPERATOR_NAMESPACE")
                .unwrap_or(defaults.operator_namespace),
            pod_name: non_empty_env("POD_NAME")
                .or_else(|| non_empty_env("HOSTNAME"))
                .unwrap_or(defaults.pod_name),
            assets_dir: non_empty_env("ASSETS_DIR").map(PathBuf::from),
            tree_version: non_empty_env("SHARED_RESOURCE_TREE_VERSION"),
            worker_cache_max_workers: env_var_or_default(
                "WORKER_CACHE_MAX_WORKERS",
                defaults.worker_cache_max_workers,
            ),
            sublease_eviction,
            image_pull_state_path: non_empty_env("IMAGE_PULL_STATE_PATH")
                .map_or(defaults.image_pull_state_path, PathBuf::from),
            cleanup_unused_resources: env_var_or_default(
                "CLEANUP_UNUSED_RESOURCES",
                defaults.cleanup_unused_resources,
            ),
            application_max_concurrent_reconciles: env_var_or_default(
                "APPLICATION_MAX_CONCURRENT_RECONCILES",
                defaults.application_max_concurrent_reconciles,
            ),
            trace_max_concurrent_reconciles: env_var_or_default(
                "TRACE_MAX_CONCURRENT_RECONCILES",
                defaults.trace_max_concurrent_reconciles,
            ),
            resync_secs: env_var_or_default("RESYNC_SECS", defaults.resync_secs),
        }
    }
}

/// `never` or `expired`; anything else falls back to `never`
pub fn parse_sublease_eviction(value: &str, threshold_secs: i64) -> SubleaseEviction {
    match value.trim().to_ascii_lowercase().as_str() {
        "expired" => SubleaseEviction::Expired { threshold_secs },
        "never" | "" => SubleaseEviction::Never,
        other => {
            warn!("Unknown SUBLEASE_EVICTION value {:?}, using 'never'", other);
            SubleaseEviction::Never
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sublease_eviction() {
        assert_eq!(parse_sublease_eviction("never", 20), SubleaseEviction::Never);
        assert_eq!(
            parse_sublease_eviction("Expired", 30),
            SubleaseEviction::Expired { threshold_secs: 30 }
        );
        assert_eq!(parse_sublease_eviction("sometimes", 20), SubleaseEviction::Never);
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.worker_cache_max_workers, 15);
        assert_eq!(config.trace_max_concurrent_reconciles, 1);
        assert_eq!(config.sublease_eviction, SubleaseEviction::Never);
        assert!(!config.cleanup_unused_resources);
    }
}
