//! Handlers for the job queue view.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::engine::dispatcher::{DispatchStats, QueuedJob};
use crate::error::AppResult;
use crate::middleware::submitter::Submitter;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct QueueView {
    pub jobs: Vec<QueuedJob>,
    pub stats: DispatchStats,
}

/// GET /api/v1/queue
///
/// Waiting jobs in service order, plus dispatcher counters.
pub async fn get_queue(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.dispatcher.queue_entries().await;
    let stats = state.dispatcher.stats().await;
    Ok(Json(DataResponse {
        data: QueueView { jobs, stats },
    }))
}

#[derive(Debug, Serialize)]
pub struct QueuePosition {
    /// One-based rank of the caller's first waiting job, `null` if none.
    pub position: Option<usize>,
    pub queued: usize,
}

/// GET /api/v1/queue/me
pub async fn my_position(
    Submitter(submitter): Submitter,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let position = state.dispatcher.position_of(&submitter).await.map(|p| p + 1);
    let queued = state.dispatcher.queue_len().await;
    Ok(Json(DataResponse {
        data: QueuePosition { position, queued },
    }))
}
