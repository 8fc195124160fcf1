//! Job records, completion handles and status delivery.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use sdqueue_core::affinity::Requirements;
use sdqueue_core::job_queue::QueueEntry;
use sdqueue_core::scheduling::JobState;
use sdqueue_core::types::{JobId, SubmitterId, Timestamp};
use sdqueue_sdapi::GenerationParams;

// ---------------------------------------------------------------------------
// Status delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One progress message for the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub message: String,
    pub severity: Severity,
}

impl StatusUpdate {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Info,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Status delivery failed: {0}")]
pub struct StatusDeliveryError(pub String);

/// Destination for a job's progress messages.
///
/// Delivery is best-effort: the dispatcher logs failures and carries on.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn notify(&self, update: StatusUpdate) -> Result<(), StatusDeliveryError>;
}

/// Forwards updates into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<StatusUpdate>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<StatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl StatusSink for ChannelSink {
    async fn notify(&self, update: StatusUpdate) -> Result<(), StatusDeliveryError> {
        self.tx
            .send(update)
            .map_err(|_| StatusDeliveryError("receiver dropped".into()))
    }
}

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// What a submitter asks for.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub submitter: SubmitterId,
    pub priority: i32,
    pub requirements: Requirements,
    pub params: GenerationParams,
}

/// Successful generation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutput {
    /// Worker that produced the images.
    pub worker: String,
    /// Base64-encoded images.
    pub images: Vec<String>,
    /// Generation info string reported by the worker.
    pub info: String,
}

/// Terminal failure of a job.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error("No online worker can serve this request")]
    WorkerUnavailable { requirements: Requirements },

    #[error("Submitter {submitter} is not authorized")]
    NotAuthorized { submitter: SubmitterId },

    #[error("Generation on {worker} timed out after {timeout:?}")]
    ExecutionTimeout { worker: String, timeout: Duration },

    #[error("Generation on {worker} failed: {detail}")]
    ExecutionFailed { worker: String, detail: String },

    #[error("Authorization for {submitter} was revoked before execution")]
    AuthorizationRevoked { submitter: SubmitterId },

    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("Dispatcher shut down before the job completed")]
    Shutdown,
}

pub type JobResult = Result<GenerationOutput, JobError>;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A live job owned by the dispatcher.
///
/// The completion sender is consumed by [`Job::resolve`], so a job can be
/// resolved at most once. Dropping an unresolved job resolves its handle
/// with [`JobError::Shutdown`].
pub struct Job {
    pub id: JobId,
    pub request: JobRequest,
    pub arrival: Timestamp,
    pub arrival_seq: u64,
    state: JobState,
    status: Arc<dyn StatusSink>,
    completion: oneshot::Sender<JobResult>,
}

impl Job {
    /// Create an admitted job and the handle its submitter waits on.
    pub fn new(
        request: JobRequest,
        arrival_seq: u64,
        status: Arc<dyn StatusSink>,
    ) -> (Self, JobHandle) {
        let (tx, rx) = oneshot::channel();
        let id = uuid::Uuid::new_v4();
        let job = Self {
            id,
            request,
            arrival: chrono::Utc::now(),
            arrival_seq,
            state: JobState::Admitted,
            status,
            completion: tx,
        };
        (job, JobHandle { id, rx })
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `to`, rejecting edges the state machine does not allow.
    pub fn transition(&mut self, to: JobState) -> Result<(), JobError> {
        self.state
            .validate_transition(to)
            .map_err(JobError::InternalInconsistency)?;
        self.state = to;
        Ok(())
    }

    /// Deliver a status update; failures and sink panics are logged, never
    /// raised.
    pub async fn notify(&self, update: StatusUpdate) {
        match AssertUnwindSafe(self.status.notify(update)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(job_id = %self.id, error = %e, "Status update not delivered");
            }
            Err(_) => tracing::error!(job_id = %self.id, "Status sink panicked"),
        }
    }

    /// Resolve the job, consuming it.
    pub fn resolve(mut self, result: JobResult) {
        let terminal = if result.is_ok() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        if let Err(e) = self.transition(terminal) {
            tracing::error!(job_id = %self.id, error = %e, "Resolving job from unexpected state");
        }
        if self.completion.send(result).is_err() {
            tracing::debug!(job_id = %self.id, "Submitter stopped waiting for result");
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("submitter", &self.request.submitter)
            .field("priority", &self.request.priority)
            .field("arrival_seq", &self.arrival_seq)
            .field("state", &self.state)
            .finish()
    }
}

impl QueueEntry for Job {
    fn priority(&self) -> i32 {
        self.request.priority
    }

    fn arrival_seq(&self) -> u64 {
        self.arrival_seq
    }

    fn submitter(&self) -> &str {
        &self.request.submitter
    }
}

/// Submitter side of a job: waits for its single resolution.
#[derive(Debug)]
pub struct JobHandle {
    pub id: JobId,
    rx: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub async fn wait(self) -> JobResult {
        self.rx.await.unwrap_or(Err(JobError::Shutdown))
    }
}
