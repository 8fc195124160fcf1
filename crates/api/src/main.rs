use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdqueue_api::background;
use sdqueue_api::config::{load_workers, ServerConfig};
use sdqueue_api::engine::admission::PermissionGate;
use sdqueue_api::engine::dispatcher::Dispatcher;
use sdqueue_api::engine::executor::SdApiExecutor;
use sdqueue_api::engine::probe::SdApiProber;
use sdqueue_api::engine::registry::WorkerRegistry;
use sdqueue_api::router::build_app_router;
use sdqueue_api::state::AppState;
use sdqueue_core::permissions::PermissionLevel;
use sdqueue_core::rate_limit::RateLimiter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sdqueue_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let descriptors = load_workers(&config.workers_config).expect("Failed to load worker list");
    tracing::info!(
        path = %config.workers_config.display(),
        workers = descriptors.len(),
        "Loaded worker list",
    );

    // --- Worker registry ---
    let http = reqwest::Client::new();
    let registry = Arc::new(WorkerRegistry::new(
        &descriptors,
        Arc::new(SdApiProber::new(http.clone(), config.probe_timeout)),
        config.probe_timeout,
    ));

    // --- Admission ---
    let permissions = Arc::new(
        PermissionGate::new(config.default_permission_level, config.generate_min_level)
            .with_levels(
                config
                    .admin_submitters
                    .iter()
                    .map(|id| (id.clone(), PermissionLevel::Admin)),
            ),
    );

    // --- Dispatcher ---
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        Arc::new(SdApiExecutor::new(http, config.dispatch.execution_timeout)),
        permissions.clone(),
        config.dispatch.clone(),
    );

    // --- Background refresh ---
    let refresh_cancel = CancellationToken::new();
    let refresh_handle = tokio::spawn(background::registry_refresh::run(
        Arc::clone(&registry),
        Arc::clone(&dispatcher),
        config.refresh_interval,
        refresh_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        dispatcher: Arc::clone(&dispatcher),
        permissions,
        rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
            config.rate_limit_max,
            config.rate_limit_window,
        ))),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    refresh_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), refresh_handle).await;
    tracing::info!("Worker refresh task stopped");

    dispatcher
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    tracing::info!("Dispatcher shut down");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
