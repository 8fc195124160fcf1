//! Route definitions for the worker registry view.

use axum::routing::get;
use axum::Router;

use crate::handlers::workers;
use crate::state::AppState;

/// Routes mounted at `/workers`.
///
/// ```text
/// GET    /              -> list_workers
/// GET    /{name}        -> get_worker
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(workers::list_workers))
        .route("/{name}", get(workers::get_worker))
}
