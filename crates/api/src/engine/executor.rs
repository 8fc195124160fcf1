//! Generation call seam.

use std::time::Duration;

use async_trait::async_trait;
use sdqueue_core::worker_pool::Worker;
use sdqueue_sdapi::{GenerationParams, SdApi, SdApiError};

use crate::engine::job::GenerationOutput;

/// Bound on a single interrupt request.
pub const INTERRUPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a generation call failed.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Generation timed out")]
    Timeout,

    #[error("Worker responded with {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Worker returned no images")]
    EmptyResult,
}

impl From<SdApiError> for ExecutionError {
    fn from(e: SdApiError) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        match e {
            SdApiError::ApiError { status, body } => Self::Remote { status, body },
            SdApiError::EmptyResult => Self::EmptyResult,
            SdApiError::Request(e) => Self::Transport(e.to_string()),
        }
    }
}

/// Runs one generation on one worker.
#[async_trait]
pub trait GenerationExecutor: Send + Sync {
    async fn execute(
        &self,
        worker: &Worker,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, ExecutionError>;

    /// Ask the worker to stop whatever it is generating. Used when the
    /// dispatcher gives up on a call that may still be running remotely.
    async fn interrupt(&self, worker: &Worker) -> Result<(), ExecutionError>;
}

/// Generates through the worker's `txt2img` endpoint.
pub struct SdApiExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl SdApiExecutor {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl GenerationExecutor for SdApiExecutor {
    async fn execute(
        &self,
        worker: &Worker,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, ExecutionError> {
        let api = SdApi::with_client(self.client.clone(), worker.endpoint.clone());
        let response = api.txt2img(params, self.timeout).await?;

        tracing::debug!(
            worker = %worker.name,
            images = response.images.len(),
            "Generation finished",
        );

        Ok(GenerationOutput {
            worker: worker.name.clone(),
            images: response.images,
            info: response.info,
        })
    }

    async fn interrupt(&self, worker: &Worker) -> Result<(), ExecutionError> {
        SdApi::with_client(self.client.clone(), worker.endpoint.clone())
            .interrupt(INTERRUPT_TIMEOUT)
            .await?;
        Ok(())
    }
}
