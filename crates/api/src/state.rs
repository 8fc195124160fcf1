use std::sync::Arc;

use tokio::sync::Mutex;

use sdqueue_core::rate_limit::RateLimiter;

use crate::config::ServerConfig;
use crate::engine::admission::PermissionGate;
use crate::engine::dispatcher::Dispatcher;
use crate::engine::registry::WorkerRegistry;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Worker registry (also reachable through the dispatcher).
    pub registry: Arc<WorkerRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    /// Permission store; the dispatcher consults it as its admission gate.
    pub permissions: Arc<PermissionGate>,
    /// Per-submitter submission limiter.
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
}
