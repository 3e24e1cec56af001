//! Metrics and health endpoints.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::info;

use crate::metrics::Metrics;

/// What the endpoints report on.
#[derive(Debug, Clone)]
pub struct ServerState {
    metrics: Metrics,
    connected: Arc<AtomicBool>,
}

impl ServerState {
    /// Report on `metrics`. The broker starts out disconnected.
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record whether the broker connection is up.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Routes for `/metrics`, `/health` and `/live`.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/live", get(live))
        .with_state(state)
}

/// Serve the endpoints on all interfaces until the task is dropped.
pub async fn serve(port: u16, state: ServerState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Metrics server listening on http://{addr}");

    axum::serve(listener, router(state)).await
}

/// Prometheus text format.
///
/// GET /metrics
async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

/// Health check. Stays up while the broker is disconnected, so the process can be inspected.
///
/// GET /health
async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let connected = state.is_connected();
    Json(json!({
        "status": if connected { "healthy" } else { "degraded" },
        "broker": if connected { "connected" } else { "disconnected" },
        "pending": state.metrics.queue_depth.get(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Liveness check.
///
/// GET /live
async fn live() -> impl IntoResponse {
    StatusCode::OK
}
