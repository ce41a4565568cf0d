//! # Watch Loop
//!
//! Runs the `OpenLibertyApplication` and `OpenLibertyTrace` controllers until shutdown
//! or, with manager leader election, until the Lease is lost.

use super::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::constants::{
    DEFAULT_WATCH_INITIAL_BACKOFF_MS, DEFAULT_WATCH_MAX_BACKOFF_MS, WATCH_TIMEOUT_SECS,
};
use crate::controller::reconciler::{reconcile_application, Reconciler};
use crate::controller::server::ServerState;
use crate::controller::Error;
use crate::crd::{OpenLibertyApplication, OpenLibertyTrace};
use crate::trace::reconcile_trace;
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::runtime::controller::{Config as ControllerRunConfig, Error as ControllerError};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Namespaced or cluster-wide API depending on `WATCH_NAMESPACE`
pub fn watched_api<K>(client: &Client, watch_namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
{
    match watch_namespace.filter(|ns| !ns.is_empty()) {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Log one controller result; stream errors get classified and slowed down
async fn handle_result<T: Debug, Q: std::error::Error + 'static>(
    controller: &'static str,
    result: Result<T, ControllerError<Error, Q>>,
    backoff: Arc<AtomicU64>,
) {
    match result {
        Ok(object) => {
            backoff.store(DEFAULT_WATCH_INITIAL_BACKOFF_MS, Ordering::Relaxed);
            debug!(?object, "{} reconciliation completed", controller);
        }
        // Already handled by the error policy
        Err(ControllerError::ReconcilerFailed(e, object)) => {
            debug!(error = %e, %object, "{} reconciliation failed", controller);
        }
        Err(ControllerError::ObjectNotFound(object)) => {
            debug!(%object, "{} object no longer exists", controller);
        }
        Err(e) => {
            handle_watch_stream_error(&e.to_string(), &backoff, DEFAULT_WATCH_MAX_BACKOFF_MS).await;
        }
    }
}

/// Run both controllers
///
/// # Errors
///
/// Returns an error when manager leadership is lost.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    leadership_lost: Option<oneshot::Receiver<()>>,
) -> Result<()> {
    let config = reconciler.config.clone();
    let watch_namespace = config.watch_namespace.as_deref();

    let applications: Api<OpenLibertyApplication> = watched_api(&client, watch_namespace);
    let deployments: Api<Deployment> = watched_api(&client, watch_namespace);
    let stateful_sets: Api<StatefulSet> = watched_api(&client, watch_namespace);
    let services: Api<Service> = watched_api(&client, watch_namespace);
    let traces: Api<OpenLibertyTrace> = watched_api(&client, watch_namespace);

    info!(
        "Starting controllers (application concurrency {}, trace concurrency {})",
        config.application_max_concurrent_reconciles, config.trace_max_concurrent_reconciles
    );
    info!("- OpenLibertyApplication controller");
    info!("- OpenLibertyTrace controller");

    let application_backoff = Arc::new(AtomicU64::new(DEFAULT_WATCH_INITIAL_BACKOFF_MS));
    let application_controller = Controller::new(applications, watcher_config())
        .owns(deployments, watcher_config())
        .owns(stateful_sets, watcher_config())
        .owns(services, watcher_config())
        .with_config(ControllerRunConfig::default().concurrency(config.application_max_concurrent_reconciles))
        .shutdown_on_signal()
        .run(
            reconcile_application,
            handle_reconciliation_error::<OpenLibertyApplication>,
            reconciler.clone(),
        )
        .for_each(|result| handle_result("Application", result, application_backoff.clone()));

    let trace_backoff = Arc::new(AtomicU64::new(DEFAULT_WATCH_INITIAL_BACKOFF_MS));
    let trace_controller = Controller::new(traces, watcher_config())
        .with_config(ControllerRunConfig::default().concurrency(config.trace_max_concurrent_reconciles))
        .shutdown_on_signal()
        .run(
            reconcile_trace,
            handle_reconciliation_error::<OpenLibertyTrace>,
            reconciler.clone(),
        )
        .for_each(|result| handle_result("Trace", result, trace_backoff.clone()));

    let controllers = futures::future::join(application_controller, trace_controller);
    match leadership_lost {
        Some(lost) => {
            tokio::select! {
                _ = controllers => {}
                _ = lost => {
                    server_state.is_ready.store(false, Ordering::Relaxed);
                    anyhow::bail!("manager leadership lost, shutting down");
                }
            }
        }
        None => {
            controllers.await;
        }
    }

    server_state.is_ready.store(false, Ordering::Relaxed);
    info!("Controllers stopped");
    Ok(())
}
