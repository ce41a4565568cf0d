//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loops.
//! This module handles reconciliation errors and watch stream errors.

use crate::constants;
use crate::controller::reconciler::{BackoffState, Reconciler};
use crate::controller::Error;
use crate::observability;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Controller label of a custom resource kind (`OpenLibertyApplication` -> `application`)
pub fn controller_name<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&())
        .trim_start_matches("OpenLiberty")
        .to_ascii_lowercase()
}

/// Handle reconciliation errors with Fibonacci backoff
///
/// Errors that need a spec change are not retried until the resource changes. Other
/// errors requeue with a backoff tracked per resource, so one failing resource does not
/// slow down the others.
pub fn handle_reconciliation_error<K>(obj: Arc<K>, error: &Error, ctx: Arc<Reconciler>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let controller = controller_name::<K>();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let kind = error.kind();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = %name,
        resource.namespace = %namespace,
        error.kind = kind.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    observability::metrics::increment_reconciliation_errors(&controller, kind.as_str());

    if !error.is_requeueable() {
        error!("Reconciliation of {}/{} failed: {}", namespace, name, error);
        error!("🔍 {}", kind.remediation());
        return Action::await_change();
    }

    if kind == crate::controller::ErrorKind::LeaderPending {
        info!("Reconciliation of {}/{} waiting: {}", namespace, name, error);
    } else {
        warn!("Reconciliation error for {}/{}: {}", namespace, name, error);
        info!("💡 {}", kind.remediation());
    }

    let resource_key = format!("{controller}/{namespace}/{name}");
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(resource_key).or_insert_with(BackoffState::new);
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, 0)
        }
    };

    let next_trigger_time =
        chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {}, trigger source: error-backoff)",
        backoff_seconds, error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s, trigger source: error-backoff)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(std::time::Duration::from_secs(backoff_seconds))
}

/// Watch stream error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// RBAC revoked or token expired
    Unauthorized,
    /// Resource version too old; the watch relists
    Expired,
    /// API server storage reinitialising
    TooManyRequests,
    /// Object deleted while queued
    NotFound,
    Other,
}

/// Classify a watch stream error by its message
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    if error_string.contains("401")
        || error_string.contains("Unauthorized")
        || error_string.contains("WatchFailed")
    {
        WatchErrorClass::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorClass::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorClass::TooManyRequests
    } else if error_string.contains("ObjectNotFound")
        || (error_string.contains("404") && error_string.contains("not found"))
    {
        WatchErrorClass::NotFound
    } else {
        WatchErrorClass::Other
    }
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// The watcher restarts by itself; this logs diagnostics and slows the stream down
/// while the API server is unhealthy.
pub async fn handle_watch_stream_error(error_string: &str, backoff: &Arc<AtomicU64>, max_backoff_ms: u64) {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );

    let class = classify_watch_error(error_string);
    match class {
        WatchErrorClass::Unauthorized => {
            error_span.in_scope(|| {
                error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
                error!("🔍 SRE Diagnostics:");
                error!("   1. Verify the ClusterRole of the operator still grants openlibertyapplications and openlibertytraces:");
                error!("      kubectl get clusterrole open-liberty-operator -o yaml");
                error!("   2. Verify the ServiceAccount token is valid and still bound:");
                error!("      kubectl auth can-i list openlibertyapplications --as=system:serviceaccount:<namespace>:open-liberty-operator");
                error!("   3. If RBAC was recently changed, restart the operator pod");
                warn!(
                    "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                    constants::DEFAULT_WATCH_RESTART_DELAY_SECS
                );
            });
            tokio::time::sleep(std::time::Duration::from_secs(
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
            ))
            .await;
        }
        WatchErrorClass::Expired => {
            error_span.in_scope(|| {
                warn!("Watch resource version expired (410) - this is normal during pod restarts, watch will restart");
            });
        }
        WatchErrorClass::TooManyRequests => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            error_span.in_scope(|| {
                warn!(
                    "API server storage reinitializing (429), backing off for {}ms before restart...",
                    current_backoff
                );
            });
            tokio::time::sleep(std::time::Duration::from_millis(current_backoff)).await;
            backoff.store(current_backoff.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
        }
        WatchErrorClass::NotFound => {
            error_span.in_scope(|| warn!("Resource not found (likely deleted), continuing watch..."));
        }
        WatchErrorClass::Other => {
            error_span.in_scope(|| error!("Controller stream error: {}", error_string));
            tokio::time::sleep(std::time::Duration::from_secs(
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
            ))
            .await;
        }
    }
}
