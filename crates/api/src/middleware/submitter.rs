//! Submitter identity extractors for Axum handlers.
//!
//! The intake sits behind a trusted front end (chat bot, web UI) that
//! forwards the end user's identity in the `x-submitter-id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sdqueue_core::error::CoreError;
use sdqueue_core::permissions::PermissionLevel;

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the caller identity.
pub const SUBMITTER_HEADER: &str = "x-submitter-id";

/// The identified caller.
///
/// ```ignore
/// async fn my_handler(Submitter(id): Submitter) -> AppResult<Json<()>> {
///     tracing::info!(submitter = %id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Submitter(pub String);

impl FromRequestParts<AppState> for Submitter {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(SUBMITTER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(format!("Missing {SUBMITTER_HEADER} header"))
            })?;

        Ok(Submitter(id.to_string()))
    }
}

/// Requires the caller to hold [`PermissionLevel::Admin`]. Rejects with 403
/// Forbidden otherwise.
pub struct RequireAdmin(pub Submitter);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let submitter = Submitter::from_request_parts(parts, state).await?;
        if state.permissions.level_of(&submitter.0).await != PermissionLevel::Admin {
            return Err(AppError::Core(CoreError::Forbidden(
                "Admin level required".into(),
            )));
        }
        Ok(RequireAdmin(submitter))
    }
}
