use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sdqueue_core::error::CoreError;

use crate::engine::job::JobError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`JobError`] for domain errors and adds
/// HTTP-specific variants. Implements [`IntoResponse`] to produce
/// consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `sdqueue_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A job that could not be admitted or did not complete.
    #[error(transparent)]
    Job(#[from] JobError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The caller did not identify themselves.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Too many submissions in the current window.
    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, key } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} {key} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            },

            // --- JobError variants ---
            AppError::Job(job) => classify_job_error(job),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            AppError::RateLimited { retry_after_secs } => {
                let body = json!({
                    "error": format!(
                        "You've reached the rate limit. Please try again in {retry_after_secs} seconds."
                    ),
                    "code": "RATE_LIMITED",
                });
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    axum::Json(body),
                )
                    .into_response();
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal(msg: &str) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %msg, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Classify a job failure into an HTTP status, error code, and message.
///
/// - An explicit checkpoint nobody has loaded maps to 404; no worker at all
///   maps to 503.
/// - Worker-side failures map to 502/504.
fn classify_job_error(err: &JobError) -> (StatusCode, &'static str, String) {
    match err {
        JobError::WorkerUnavailable { requirements } => match &requirements.checkpoint {
            Some(checkpoint) => (
                StatusCode::NOT_FOUND,
                "CHECKPOINT_UNAVAILABLE",
                format!("The selected checkpoint \"{checkpoint}\" is not available on any online server"),
            ),
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_WORKER_AVAILABLE",
                "No online server can handle this request".to_string(),
            ),
        },
        JobError::NotAuthorized { .. } => (
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "You do not have permission to generate images".to_string(),
        ),
        JobError::AuthorizationRevoked { .. } => (
            StatusCode::FORBIDDEN,
            "AUTHORIZATION_REVOKED",
            err.to_string(),
        ),
        JobError::ExecutionTimeout { .. } => {
            (StatusCode::GATEWAY_TIMEOUT, "GENERATION_TIMEOUT", err.to_string())
        }
        JobError::ExecutionFailed { .. } => {
            (StatusCode::BAD_GATEWAY, "GENERATION_FAILED", err.to_string())
        }
        JobError::Shutdown => (
            StatusCode::SERVICE_UNAVAILABLE,
            "SHUTTING_DOWN",
            err.to_string(),
        ),
        JobError::InternalInconsistency(msg) => internal(msg),
    }
}
