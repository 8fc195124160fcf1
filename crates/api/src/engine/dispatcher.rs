//! Job dispatcher.
//!
//! Admits jobs, dispatches them straight to an idle compatible worker when
//! one can be claimed, and otherwise parks them in the priority queue. A
//! single-flight drain loop works the queue head-first, retrying with a
//! fixed backoff up to a retry ceiling, after which it stops and schedules
//! itself again after a longer delay.
//!
//! Every claimed worker is released by exactly one cleanup step at the end
//! of the execution that claimed it, whatever the outcome.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use sdqueue_core::affinity::{select_worker, AffinityMatch, Requirements};
use sdqueue_core::job_queue::{JobQueue, QueueEntry};
use sdqueue_core::scheduling::{
    JobState, DEFAULT_EXECUTION_TIMEOUT, DEFAULT_RESCHEDULE_DELAY, DEFAULT_RETRY_BACKOFF,
    DEFAULT_RETRY_CEILING,
};
use sdqueue_core::types::{JobId, SubmitterId, Timestamp};
use sdqueue_core::worker_pool::{Feature, Worker};

use crate::engine::admission::AdmissionGate;
use crate::engine::executor::{ExecutionError, GenerationExecutor, INTERRUPT_TIMEOUT};
use crate::engine::job::{Job, JobError, JobHandle, JobRequest, JobResult, StatusSink, StatusUpdate};
use crate::engine::registry::WorkerRegistry;

/// Tunables for dispatch and draining.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Hard limit on a single generation call.
    pub execution_timeout: Duration,
    /// Consecutive failed drain attempts before the loop backs off.
    pub retry_ceiling: u32,
    /// Pause between failed drain attempts.
    pub retry_backoff: Duration,
    /// Delay before a fresh drain after the ceiling was hit.
    pub reschedule_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            retry_ceiling: DEFAULT_RETRY_CEILING,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            reschedule_delay: DEFAULT_RESCHEDULE_DELAY,
        }
    }
}

/// A waiting job, as shown by the queue view.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub submitter: SubmitterId,
    pub priority: i32,
    pub checkpoint: Option<String>,
    pub feature: Option<Feature>,
    /// Zero-based rank in service order.
    pub position: usize,
    pub arrival: Timestamp,
}

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub queued: usize,
    pub draining: bool,
    /// Jobs handed to a worker (immediately or from the queue).
    pub dispatched: u64,
    /// Drain attempts that could not place the head job.
    pub drain_attempts: u64,
    /// Delayed drains scheduled after hitting the retry ceiling.
    pub reschedules: u64,
}

/// Why a drain loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainExit {
    Empty,
    Ceiling,
    Cancelled,
}

pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    executor: Arc<dyn GenerationExecutor>,
    gate: Arc<dyn AdmissionGate>,
    config: DispatchConfig,
    queue: Mutex<JobQueue<Job>>,
    draining: AtomicBool,
    reschedule_pending: AtomicBool,
    next_seq: AtomicU64,
    dispatched: AtomicU64,
    drain_attempts: AtomicU64,
    reschedules: AtomicU64,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        executor: Arc<dyn GenerationExecutor>,
        gate: Arc<dyn AdmissionGate>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            executor,
            gate,
            config,
            queue: Mutex::new(JobQueue::new()),
            draining: AtomicBool::new(false),
            reschedule_pending: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            drain_attempts: AtomicU64::new(0),
            reschedules: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Admit a job.
    ///
    /// Dispatches immediately when an idle compatible worker can be
    /// claimed; otherwise queues the job with a "Waiting in queue" status.
    /// Returns the handle the submitter awaits the result on.
    pub async fn submit(
        self: &Arc<Self>,
        request: JobRequest,
        status: Arc<dyn StatusSink>,
    ) -> Result<JobHandle, JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Shutdown);
        }
        if !self.gate.is_authorized(&request.submitter).await {
            return Err(JobError::NotAuthorized {
                submitter: request.submitter,
            });
        }

        let claimed = self.try_claim(&request.requirements).await?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (job, handle) = Job::new(request, seq, status);

        tracing::info!(
            job_id = %job.id,
            submitter = %job.request.submitter,
            priority = job.request.priority,
            checkpoint = job.request.requirements.checkpoint.as_deref().unwrap_or("<any>"),
            "Job admitted",
        );

        match claimed {
            Some(worker) => self.spawn_execution(job, worker),
            None => self.enqueue(job).await,
        }

        Ok(handle)
    }

    /// Whether any online worker could ever serve `requirements`, busy or
    /// not. Used by the intake to reject hopeless requests up front.
    pub async fn check_availability(&self, requirements: &Requirements) -> Result<(), JobError> {
        let snapshot = self.registry.list_online().await;
        match select_worker(requirements, &snapshot) {
            AffinityMatch::Unavailable => Err(JobError::WorkerUnavailable {
                requirements: requirements.clone(),
            }),
            AffinityMatch::Idle(_) | AffinityMatch::Occupied(_) => Ok(()),
        }
    }

    /// Worker state changed (refresh finished); retry waiting jobs.
    pub async fn notify_workers_changed(self: &Arc<Self>) {
        if !self.queue.lock().await.is_empty() {
            self.schedule_drain();
        }
    }

    /// Waiting jobs in service order.
    pub async fn queue_entries(&self) -> Vec<QueuedJob> {
        self.queue
            .lock()
            .await
            .entries()
            .enumerate()
            .map(|(position, job)| QueuedJob {
                id: job.id,
                submitter: job.request.submitter.clone(),
                priority: job.request.priority,
                checkpoint: job.request.requirements.checkpoint.clone(),
                feature: job.request.requirements.feature,
                position,
                arrival: job.arrival,
            })
            .collect()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Zero-based rank of the submitter's first waiting job.
    pub async fn position_of(&self, submitter: &str) -> Option<usize> {
        self.queue.lock().await.position_of(submitter)
    }

    pub async fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.queue_len().await,
            draining: self.draining.load(Ordering::SeqCst),
            dispatched: self.dispatched.load(Ordering::SeqCst),
            drain_attempts: self.drain_attempts.load(Ordering::SeqCst),
            reschedules: self.reschedules.load(Ordering::SeqCst),
        }
    }

    /// Stop the dispatcher.
    ///
    /// Running generations are abandoned at once: each is interrupted on its
    /// worker, released and resolved with [`JobError::Shutdown`]. `grace`
    /// bounds how long that cleanup may take. Still-queued jobs are then
    /// resolved with [`JobError::Shutdown`] too.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        self.tasks.close();

        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Dispatcher tasks did not finish within grace period",
            );
        }

        let mut queue = self.queue.lock().await;
        let abandoned = queue.len();
        while let Some(job) = queue.dequeue() {
            job.resolve(Err(JobError::Shutdown));
        }
        if abandoned > 0 {
            tracing::info!(abandoned, "Abandoned queued jobs on shutdown");
        }
    }

    // ---- dispatch internals ----

    /// Match against a fresh snapshot and claim the idle winner, if any.
    ///
    /// `Ok(None)` covers "occupied", "unavailable" and a lost claim race;
    /// all three mean the job should wait.
    async fn try_claim(&self, requirements: &Requirements) -> Result<Option<Worker>, JobError> {
        let snapshot = self.registry.list_online().await;
        let AffinityMatch::Idle(worker) = select_worker(requirements, &snapshot) else {
            return Ok(None);
        };

        match self.registry.try_set_busy(&worker.name, true).await {
            Ok(true) => Ok(Some(worker.clone())),
            Ok(false) => {
                tracing::debug!(worker = %worker.name, "Lost claim race");
                Ok(None)
            }
            Err(e) => Err(JobError::InternalInconsistency(e.to_string())),
        }
    }

    async fn enqueue(self: &Arc<Self>, mut job: Job) {
        if let Err(e) = job.transition(JobState::Queued) {
            tracing::error!(job_id = %job.id, state = ?job.state(), error = %e, "Cannot queue job");
            job.resolve(Err(e));
            return;
        }

        // Reported before insertion so it precedes any later status of this
        // job; concurrent submissions may shift the actual rank.
        let index = self.queue.lock().await.insertion_index(&job);
        job.notify(StatusUpdate::info(format!(
            "Waiting in queue (position {})",
            index + 1
        )))
        .await;

        let position = self.queue.lock().await.enqueue(job);
        tracing::debug!(position, "Job queued");
        self.schedule_drain();
    }

    fn spawn_execution(self: &Arc<Self>, job: Job, worker: Worker) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let this = Arc::clone(self);
        self.tasks.spawn(async move { this.execute(job, worker).await });
    }

    /// Run a job on a worker it has already claimed, then clean up.
    ///
    /// A panic anywhere in the run is turned into a failure so the release
    /// below is reached on every path.
    async fn execute(self: Arc<Self>, mut job: Job, worker: Worker) {
        let result = match job.transition(JobState::Executing) {
            Ok(()) => AssertUnwindSafe(self.run_generation(&job, &worker))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(job_id = %job.id, worker = %worker.name, "Generation task panicked");
                    Err(JobError::ExecutionFailed {
                        worker: worker.name.clone(),
                        detail: "generation task panicked".into(),
                    })
                }),
            Err(e) => Err(e),
        };

        self.registry.release(&worker.name).await;
        self.schedule_drain();

        match &result {
            Ok(output) => tracing::info!(
                job_id = %job.id,
                worker = %worker.name,
                images = output.images.len(),
                "Job succeeded",
            ),
            Err(e) => {
                tracing::warn!(job_id = %job.id, worker = %worker.name, error = %e, "Job failed");
                job.notify(StatusUpdate::error(format!(
                    "Error generating image on {}",
                    worker.name
                )))
                .await;
            }
        }

        job.resolve(result);
    }

    async fn run_generation(&self, job: &Job, worker: &Worker) -> JobResult {
        if !self.gate.is_authorized(&job.request.submitter).await {
            return Err(JobError::AuthorizationRevoked {
                submitter: job.request.submitter.clone(),
            });
        }

        job.notify(StatusUpdate::info(format!(
            "Generating image on {}",
            worker.name
        )))
        .await;

        let timeout = self.config.execution_timeout;
        let call = AssertUnwindSafe(self.executor.execute(worker, &job.request.params)).catch_unwind();

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.interrupt(worker).await;
                return Err(JobError::Shutdown);
            }
            outcome = tokio::time::timeout(timeout, call) => outcome,
        };

        match outcome {
            Err(_) | Ok(Ok(Err(ExecutionError::Timeout))) => {
                self.interrupt(worker).await;
                Err(JobError::ExecutionTimeout {
                    worker: worker.name.clone(),
                    timeout,
                })
            }
            Ok(Err(_panic)) => Err(JobError::ExecutionFailed {
                worker: worker.name.clone(),
                detail: "executor panicked".into(),
            }),
            Ok(Ok(Err(e))) => Err(JobError::ExecutionFailed {
                worker: worker.name.clone(),
                detail: e.to_string(),
            }),
            Ok(Ok(Ok(output))) => Ok(output),
        }
    }

    /// Stop a generation the worker may still be running, so the next job
    /// does not land on a worker that is busy remotely.
    async fn interrupt(&self, worker: &Worker) {
        match tokio::time::timeout(INTERRUPT_TIMEOUT, self.executor.interrupt(worker)).await {
            Ok(Ok(())) => tracing::info!(worker = %worker.name, "Interrupted abandoned generation"),
            Ok(Err(e)) => {
                tracing::warn!(worker = %worker.name, error = %e, "Failed to interrupt generation")
            }
            Err(_) => tracing::warn!(worker = %worker.name, "Interrupt request timed out"),
        }
    }

    // ---- drain internals ----

    /// Start a drain unless one is already running.
    fn schedule_drain(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::trace!("Drain already running, request coalesced");
            return;
        }
        let this = Arc::clone(self);
        self.tasks.spawn(async move { this.drain().await });
    }

    /// Schedule a drain after the reschedule delay; at most one pending.
    fn schedule_delayed_drain(self: &Arc<Self>) {
        if self
            .reschedule_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.reschedules.fetch_add(1, Ordering::SeqCst);
        let delay = self.config.reschedule_delay;
        tracing::info!(delay_secs = delay.as_secs(), "Drain retry ceiling reached, backing off");

        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                _ = this.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    this.reschedule_pending.store(false, Ordering::SeqCst);
                    this.schedule_drain();
                }
            }
        });
    }

    async fn drain(self: Arc<Self>) {
        let exit = self.drain_loop().await;
        self.draining.store(false, Ordering::SeqCst);

        match exit {
            // A job queued between the final empty check and the flag reset
            // had its drain request coalesced away.
            DrainExit::Empty => {
                if !self.queue.lock().await.is_empty() {
                    self.schedule_drain();
                }
            }
            DrainExit::Ceiling => self.schedule_delayed_drain(),
            DrainExit::Cancelled => tracing::debug!("Drain cancelled"),
        }
    }

    async fn drain_loop(self: &Arc<Self>) -> DrainExit {
        let mut retries: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return DrainExit::Cancelled;
            }
            let Some(mut job) = self.queue.lock().await.dequeue() else {
                return DrainExit::Empty;
            };

            if !self.gate.is_authorized(job.submitter()).await {
                tracing::info!(
                    job_id = %job.id,
                    submitter = %job.request.submitter,
                    "Authorization revoked while queued",
                );
                let submitter = job.request.submitter.clone();
                job.notify(StatusUpdate::error("You are no longer allowed to generate images"))
                    .await;
                job.resolve(Err(JobError::AuthorizationRevoked { submitter }));
                retries = 0;
                continue;
            }

            match self.try_claim(&job.request.requirements).await {
                Ok(Some(worker)) => {
                    retries = 0;
                    tracing::debug!(job_id = %job.id, worker = %worker.name, "Dispatching queued job");
                    self.spawn_execution(job, worker);
                }
                Ok(None) => {
                    self.drain_attempts.fetch_add(1, Ordering::SeqCst);
                    if let Err(e) = job.transition(JobState::Queued) {
                        tracing::error!(job_id = %job.id, state = ?job.state(), error = %e, "Cannot requeue job");
                    }
                    self.queue.lock().await.enqueue(job);

                    retries += 1;
                    if retries >= self.config.retry_ceiling {
                        return DrainExit::Ceiling;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => return DrainExit::Cancelled,
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Claim failed");
                    job.resolve(Err(e));
                }
            }
        }
    }
}
