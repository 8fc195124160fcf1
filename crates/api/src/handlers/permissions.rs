//! Handlers for submitter permission levels.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use sdqueue_core::permissions::PermissionLevel;

use crate::error::{AppError, AppResult};
use crate::middleware::submitter::{RequireAdmin, Submitter};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PermissionView {
    pub submitter: String,
    pub level: PermissionLevel,
    /// Whether this level may currently generate.
    pub can_generate: bool,
}

/// Request body for `PUT /permissions/{submitter}`.
#[derive(Debug, Deserialize)]
pub struct SetLevelInput {
    /// Level name (`user`, `trusted`, `moderator`, `admin`, `denied`) or
    /// numeric role level.
    pub level: String,
}

#[derive(Debug, Serialize)]
pub struct LevelChange {
    pub submitter: String,
    pub previous: PermissionLevel,
    pub level: PermissionLevel,
}

/// GET /api/v1/permissions/{submitter}
///
/// Callers may look up their own level; other submitters need Admin.
pub async fn get_level(
    Submitter(caller): Submitter,
    State(state): State<AppState>,
    Path(submitter): Path<String>,
) -> AppResult<impl IntoResponse> {
    if caller != submitter && state.permissions.level_of(&caller).await != PermissionLevel::Admin
    {
        return Err(AppError::Core(sdqueue_core::error::CoreError::Forbidden(
            "Admin level required to view other submitters".into(),
        )));
    }

    let level = state.permissions.level_of(&submitter).await;
    Ok(Json(DataResponse {
        data: PermissionView {
            submitter,
            level,
            can_generate: level.allows(state.permissions.required_level()),
        },
    }))
}

/// PUT /api/v1/permissions/{submitter}
pub async fn set_level(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(submitter): Path<String>,
    Json(input): Json<SetLevelInput>,
) -> AppResult<impl IntoResponse> {
    let level: PermissionLevel = input.level.parse()?;
    if admin.0 == submitter && level != PermissionLevel::Admin {
        return Err(AppError::BadRequest(
            "Admins cannot lower their own level".into(),
        ));
    }

    let previous = state.permissions.set_level(&submitter, level).await;
    tracing::info!(admin = %admin.0, submitter = %submitter, %level, "Permission level set");

    Ok(Json(DataResponse {
        data: LevelChange {
            submitter,
            previous,
            level,
        },
    }))
}
