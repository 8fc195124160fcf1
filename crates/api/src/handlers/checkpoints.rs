//! Handlers for the checkpoint catalog (drives checkpoint autocomplete).

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::engine::registry::CheckpointAvailability;
use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Maximum number of suggestions returned.
const MAX_SUGGESTIONS: usize = 25;

#[derive(Debug, Deserialize)]
pub struct CheckpointQuery {
    /// Case-insensitive substring filter.
    pub q: Option<String>,
}

/// One autocomplete suggestion.
#[derive(Debug, Serialize)]
pub struct CheckpointSuggestion {
    /// Display label, e.g. `modelA (gpu-1, gpu-2)`.
    pub label: String,
    /// Value to submit as the `checkpoint` field.
    pub value: String,
    pub workers: Vec<String>,
}

impl From<CheckpointAvailability> for CheckpointSuggestion {
    fn from(c: CheckpointAvailability) -> Self {
        Self {
            label: format!("{} ({})", c.name, c.workers.join(", ")),
            value: c.name,
            workers: c.workers,
        }
    }
}

/// GET /api/v1/checkpoints?q=
///
/// Checkpoints available on online workers. The filter matches against the
/// label, so a worker name finds every checkpoint it serves.
pub async fn list_checkpoints(
    State(state): State<AppState>,
    Query(query): Query<CheckpointQuery>,
) -> AppResult<impl IntoResponse> {
    let needle = query.q.unwrap_or_default().to_lowercase();

    let suggestions: Vec<CheckpointSuggestion> = state
        .registry
        .available_checkpoints()
        .await
        .into_iter()
        .map(CheckpointSuggestion::from)
        .filter(|s| s.label.to_lowercase().contains(&needle))
        .take(MAX_SUGGESTIONS)
        .collect();

    Ok(Json(DataResponse { data: suggestions }))
}
