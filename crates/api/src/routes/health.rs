use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Workers that answered the last probe.
    pub workers_online: usize,
    pub workers_total: usize,
    /// Jobs waiting for a worker.
    pub queued: usize,
}

/// GET /health -- returns service health and worker availability.
///
/// Reports `degraded` while no worker is online; the process itself is
/// still serving.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let workers_online = state.registry.online_count().await;
    let workers_total = state.registry.len().await;

    let status = if workers_online > 0 { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        workers_online,
        workers_total,
        queued: state.dispatcher.queue_len().await,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
