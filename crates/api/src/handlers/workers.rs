//! Handlers for the worker registry view.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use sdqueue_core::error::CoreError;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/workers
///
/// Every configured worker with its liveness, loaded checkpoint, features
/// and busy flag, in configuration order.
pub async fn list_workers(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let workers = state.registry.snapshot().await;
    Ok(Json(DataResponse { data: workers }))
}

/// GET /api/v1/workers/{name}
pub async fn get_worker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let worker = state.registry.get(&name).await.ok_or(AppError::Core(
        CoreError::NotFound {
            entity: "Worker",
            key: name,
        },
    ))?;
    Ok(Json(DataResponse { data: worker }))
}
