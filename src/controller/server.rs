//! # HTTP Server
//!
//! Prometheus metrics on the metrics address; liveness and readiness probes on the
//! health-probe address.

use crate::observability::metrics::gather_metrics;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared server state
#[derive(Debug, Default)]
pub struct ServerState {
    /// Set once both listeners are bound
    pub is_ready: Arc<AtomicBool>,
}

async fn metrics_handler() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
}

pub fn probe_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Bind both listeners, mark the server ready, and serve until an error
///
/// # Errors
///
/// Returns an error when a listener cannot be bound or a server fails.
pub async fn start_server(
    metrics_addr: SocketAddr,
    probe_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<()> {
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("Failed to bind metrics address {metrics_addr}"))?;
    let probe_listener = tokio::net::TcpListener::bind(probe_addr)
        .await
        .with_context(|| format!("Failed to bind health probe address {probe_addr}"))?;

    info!("📊 Serving metrics on http://{}/metrics", metrics_addr);
    info!("❤️  Serving probes on http://{}/healthz and /readyz", probe_addr);
    state.is_ready.store(true, Ordering::Relaxed);

    let metrics = axum::serve(metrics_listener, metrics_router());
    let probes = axum::serve(probe_listener, probe_router(state));
    tokio::try_join!(
        async { metrics.await.context("metrics server failed") },
        async { probes.await.context("probe server failed") },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readyz_follows_state() {
        let state = Arc::new(ServerState::default());
        let response = readyz(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.is_ready.store(true, Ordering::Relaxed);
        let response = readyz(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
