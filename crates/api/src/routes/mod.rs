pub mod health;
pub mod permissions;
pub mod workers;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /workers                         registry snapshot (GET)
/// /workers/{name}                  single worker (GET)
///
/// /checkpoints?q=                  checkpoint catalog, max 25 (GET)
///
/// /queue                           waiting jobs and counters (GET)
/// /queue/me                        caller's queue position (GET)
///
/// /generate                        admit a job and wait for it (POST)
///
/// /permissions/{submitter}         get (self or admin), set (admin, PUT)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/workers", workers::router())
        .route("/checkpoints", get(handlers::checkpoints::list_checkpoints))
        .route("/queue", get(handlers::queue::get_queue))
        .route("/queue/me", get(handlers::queue::my_position))
        .route("/generate", post(handlers::generate::generate))
        .nest("/permissions", permissions::router())
}
