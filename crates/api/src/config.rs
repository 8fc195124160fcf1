use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use sdqueue_core::error::CoreError;
use sdqueue_core::permissions::PermissionLevel;
use sdqueue_core::worker_pool::{validate_descriptors, WorkerDescriptor};

use crate::engine::dispatcher::DispatchConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Must cover a full generation, since
    /// `POST /api/v1/generate` waits for the result.
    pub request_timeout_secs: u64,
    /// Grace period for running generations on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Path of the JSON worker list.
    pub workers_config: PathBuf,
    pub refresh_interval: Duration,
    pub probe_timeout: Duration,
    pub dispatch: DispatchConfig,
    /// Submissions allowed per submitter per window.
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    /// Level of submitters without an explicit assignment.
    pub default_permission_level: PermissionLevel,
    /// Minimum level required to generate.
    pub generate_min_level: PermissionLevel,
    /// Submitters granted [`PermissionLevel::Admin`] at startup.
    pub admin_submitters: Vec<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                    |
    /// |----------------------------|----------------------------|
    /// | `HOST`                     | `0.0.0.0`                  |
    /// | `PORT`                     | `3000`                     |
    /// | `CORS_ORIGINS`             | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`     | `960`                      |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `30`                       |
    /// | `WORKERS_CONFIG`           | `workers.json`             |
    /// | `REFRESH_INTERVAL_SECS`    | `20`                       |
    /// | `PROBE_TIMEOUT_SECS`       | `5`                        |
    /// | `EXECUTION_TIMEOUT_SECS`   | `900`                      |
    /// | `DRAIN_RETRY_CEILING`      | `10`                       |
    /// | `DRAIN_BACKOFF_SECS`       | `5`                        |
    /// | `DRAIN_RESCHEDULE_SECS`    | `30`                       |
    /// | `RATE_LIMIT_MAX`           | `10`                       |
    /// | `RATE_LIMIT_WINDOW_SECS`   | `300`                      |
    /// | `DEFAULT_PERMISSION_LEVEL` | `user`                     |
    /// | `GENERATE_MIN_LEVEL`       | `user`                     |
    /// | `ADMIN_SUBMITTERS`         | (empty, comma-separated)   |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins = comma_list("CORS_ORIGINS", "http://localhost:5173");

        let workers_config =
            PathBuf::from(std::env::var("WORKERS_CONFIG").unwrap_or_else(|_| "workers.json".into()));

        let dispatch = DispatchConfig {
            execution_timeout: Duration::from_secs(env_u64("EXECUTION_TIMEOUT_SECS", 900)),
            retry_ceiling: env_u64("DRAIN_RETRY_CEILING", 10)
                .try_into()
                .expect("DRAIN_RETRY_CEILING must fit in u32"),
            retry_backoff: Duration::from_secs(env_u64("DRAIN_BACKOFF_SECS", 5)),
            reschedule_delay: Duration::from_secs(env_u64("DRAIN_RESCHEDULE_SECS", 30)),
        };
        assert!(dispatch.retry_ceiling > 0, "DRAIN_RETRY_CEILING must be positive");

        let default_permission_level = env_level("DEFAULT_PERMISSION_LEVEL", "user");
        let generate_min_level = env_level("GENERATE_MIN_LEVEL", "user");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_u64("REQUEST_TIMEOUT_SECS", 960),
            shutdown_timeout_secs: env_u64("SHUTDOWN_TIMEOUT_SECS", 30),
            workers_config,
            refresh_interval: Duration::from_secs(env_u64("REFRESH_INTERVAL_SECS", 20)),
            probe_timeout: Duration::from_secs(env_u64("PROBE_TIMEOUT_SECS", 5)),
            dispatch,
            rate_limit_max: env_u64("RATE_LIMIT_MAX", 10)
                .try_into()
                .expect("RATE_LIMIT_MAX must fit in u32"),
            rate_limit_window: Duration::from_secs(env_u64("RATE_LIMIT_WINDOW_SECS", 300)),
            default_permission_level,
            generate_min_level,
            admin_submitters: comma_list("ADMIN_SUBMITTERS", ""),
        }
    }
}

impl Default for ServerConfig {
    /// Development defaults, identical to [`ServerConfig::from_env`] with an
    /// empty environment.
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            cors_origins: vec!["http://localhost:5173".into()],
            request_timeout_secs: 960,
            shutdown_timeout_secs: 30,
            workers_config: PathBuf::from("workers.json"),
            refresh_interval: Duration::from_secs(20),
            probe_timeout: Duration::from_secs(5),
            dispatch: DispatchConfig::default(),
            rate_limit_max: 10,
            rate_limit_window: Duration::from_secs(300),
            default_permission_level: PermissionLevel::User,
            generate_min_level: PermissionLevel::User,
            admin_submitters: Vec::new(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid u64")),
        Err(_) => default,
    }
}

fn env_level(key: &str, default: &str) -> PermissionLevel {
    std::env::var(key)
        .unwrap_or_else(|_| default.into())
        .parse()
        .unwrap_or_else(|e| panic!("{key}: {e}"))
}

fn comma_list(key: &str, default: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_else(|_| default.into())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Worker list
// ---------------------------------------------------------------------------

/// Errors loading the worker list.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

/// Accepted file layouts: a bare array, or `{ "workers": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum WorkersFile {
    List(Vec<WorkerDescriptor>),
    Wrapped { workers: Vec<WorkerDescriptor> },
}

/// Parse and validate a worker list from JSON text.
pub fn parse_workers(json: &str, path: &str) -> Result<Vec<WorkerDescriptor>, ConfigError> {
    let file: WorkersFile = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })?;
    let descriptors = match file {
        WorkersFile::List(list) | WorkersFile::Wrapped { workers: list } => list,
    };
    validate_descriptors(&descriptors)?;
    Ok(descriptors)
}

/// Read, parse and validate the worker list file.
pub fn load_workers(path: &Path) -> Result<Vec<WorkerDescriptor>, ConfigError> {
    let display = path.display().to_string();
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    parse_workers(&json, &display)
}
