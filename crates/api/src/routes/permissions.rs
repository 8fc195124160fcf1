//! Route definitions for submitter permission levels.

use axum::routing::get;
use axum::Router;

use crate::handlers::permissions;
use crate::state::AppState;

/// Routes mounted at `/permissions`.
///
/// ```text
/// GET    /{submitter}   -> get_level (self or admin)
/// PUT    /{submitter}   -> set_level (admin)
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{submitter}",
        get(permissions::get_level).put(permissions::set_level),
    )
}
