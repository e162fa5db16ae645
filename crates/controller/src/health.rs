//! Liveness and readiness endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::queue::WorkQueue;

#[derive(Clone)]
pub struct HealthState {
    pub synced: Arc<AtomicBool>,
    pub queue: Arc<WorkQueue<String>>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
}

/// Serve the health endpoints until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    state: HealthState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Health server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "resource-guard",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let depth = state.queue.len();
    if state.synced.load(Ordering::SeqCst) && !state.queue.is_shutting_down() {
        (
            StatusCode::OK,
            Json(json!({ "status": "ready", "queueDepth": depth })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "queueDepth": depth })),
        )
    }
}
