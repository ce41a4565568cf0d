//! # Initialization
//!
//! Operator startup: rustls provider, tracing, metrics, HTTP servers, configuration,
//! sharing assets, Kubernetes client and the startup resource summary.

use crate::config::{load_config, ServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::{OpenLibertyApplication, OpenLibertyTrace};
use crate::observability;
use crate::runtime::watch_loop::watched_api;
use crate::sharing::SharingAssets;
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Listener addresses from the command line
#[derive(Debug, Clone, Copy)]
pub struct ListenAddresses {
    pub metrics: SocketAddr,
    pub health_probe: SocketAddr,
}

/// Initialization result containing all necessary components for the controllers
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
}

/// Initialize the operator runtime
///
/// # Errors
///
/// Fails when `WATCH_NAMESPACE` is unset, the assets cannot be loaded, the HTTP servers
/// do not come up, or no Kubernetes client can be built.
pub async fn initialize(addresses: ListenAddresses) -> Result<InitializationResult> {
    // Required for rustls 0.23+ when no default provider is set via features
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "open_liberty_operator=info".into()),
        )
        .init();

    info!("Starting Open Liberty Operator v{}", env!("CARGO_PKG_VERSION"));

    let (controller_config, server_config) = load_config();
    let Some(watch_namespace) = controller_config.watch_namespace.as_deref() else {
        anyhow::bail!("WATCH_NAMESPACE must be set (empty for all namespaces)");
    };
    if watch_namespace.is_empty() {
        info!("Watching all namespaces");
    } else {
        info!("Watching namespace {}", watch_namespace);
    }

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });
    let server_state_clone = server_state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(addresses.metrics, addresses.health_probe, server_state_clone).await {
            error!("HTTP server error: {:#}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let assets = SharingAssets::load(
        controller_config.assets_dir.as_deref(),
        controller_config.tree_version.as_deref(),
    )
    .context("Failed to load shared-resource assets")?;
    match &controller_config.assets_dir {
        Some(dir) => info!("Loaded shared-resource assets from {}", dir.display()),
        None => info!("Using built-in shared-resource assets"),
    }

    let client = Client::try_default().await?;

    summarize_existing_resources::<OpenLibertyApplication>(&watched_api(&client, Some(watch_namespace))).await;
    summarize_existing_resources::<OpenLibertyTrace>(&watched_api(&client, Some(watch_namespace))).await;

    let reconciler = Arc::new(Reconciler::new(client.clone(), controller_config, Arc::new(assets)));

    info!("Operator initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = std::time::Duration::from_secs(server_config.startup_timeout_secs);
    let poll_interval = std::time::Duration::from_millis(server_config.poll_interval_ms);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Summary line of up to three names
pub fn summarize_names(names: &[String]) -> String {
    if names.len() <= 3 {
        names.join(", ")
    } else {
        format!("{}, ... ({} total)", names[..3].join(", "), names.len())
    }
}

/// Log the existing resources of kind `K` by namespace
///
/// The controllers reconcile every listed resource on their first pass; this only checks
/// the CRD is installed and gives operations a startup picture.
async fn summarize_existing_resources<K>(api: &Api<K>)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let kind = K::kind(&());
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.summarize_existing",
        resource.kind = %kind
    );
    let _guard = span.enter();

    let list = match api.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            error!("CRD {} is not queryable; {:?}. Is the CRD installed?", kind, e);
            error!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - controller will retry");
            return;
        }
    };
    if list.items.is_empty() {
        info!("No existing {} resources found, watch will pick up new resources", kind);
        return;
    }

    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in &list.items {
        by_namespace
            .entry(item.namespace().unwrap_or_default())
            .or_default()
            .push(item.name_any());
    }

    info!("Open Liberty Operator - Startup Resource Summary");
    info!("Resource Kind: {}", kind);
    info!("Total Resources: {}", list.items.len());
    info!("Namespaces: {}", by_namespace.len());
    for (namespace, names) in &mut by_namespace {
        names.sort();
        info!("Namespace: {}", namespace);
        info!("  Resources ({}): {}", names.len(), summarize_names(names));
    }
}
