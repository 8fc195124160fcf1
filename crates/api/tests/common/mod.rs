#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tower::ServiceExt;

use sdqueue_api::config::ServerConfig;
use sdqueue_api::engine::admission::{AdmissionGate, PermissionGate};
use sdqueue_api::engine::dispatcher::{DispatchConfig, Dispatcher};
use sdqueue_api::engine::executor::{ExecutionError, GenerationExecutor};
use sdqueue_api::engine::job::{GenerationOutput, StatusDeliveryError, StatusSink, StatusUpdate};
use sdqueue_api::engine::probe::{ProbeError, ProbeReport, WorkerProbe};
use sdqueue_api::engine::registry::WorkerRegistry;
use sdqueue_api::middleware::submitter::SUBMITTER_HEADER;
use sdqueue_api::router::build_app_router;
use sdqueue_api::state::AppState;
use sdqueue_core::permissions::PermissionLevel;
use sdqueue_core::rate_limit::RateLimiter;
use sdqueue_core::worker_pool::{ExtensionInfo, Worker, WorkerDescriptor};
use sdqueue_sdapi::GenerationParams;

// ---------------------------------------------------------------------------
// Fake probe
// ---------------------------------------------------------------------------

/// Probe answering from a mutable table; missing workers are unreachable.
#[derive(Default)]
pub struct FakeProbe {
    answers: StdMutex<HashMap<String, ProbeReport>>,
}

impl FakeProbe {
    pub fn online(&self, worker: &str, checkpoint: &str) {
        self.online_with(worker, checkpoint, Vec::new());
    }

    pub fn online_with(&self, worker: &str, checkpoint: &str, extensions: Vec<&str>) {
        self.answers.lock().unwrap().insert(
            worker.to_string(),
            ProbeReport {
                checkpoint: Some(checkpoint.to_string()),
                extensions: extensions
                    .into_iter()
                    .map(|name| ExtensionInfo {
                        name: name.to_string(),
                        enabled: true,
                    })
                    .collect(),
            },
        );
    }

    pub fn offline(&self, worker: &str) {
        self.answers.lock().unwrap().remove(worker);
    }
}

#[async_trait]
impl WorkerProbe for FakeProbe {
    async fn probe(&self, worker: &Worker) -> Result<ProbeReport, ProbeError> {
        self.answers
            .lock()
            .unwrap()
            .get(&worker.name)
            .cloned()
            .ok_or_else(|| ProbeError::Unreachable("connection refused".into()))
    }
}

// ---------------------------------------------------------------------------
// Fake executor
// ---------------------------------------------------------------------------

/// What the fake executor does once allowed to finish.
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed,
    Fail(u16),
    Hang,
    Panic,
}

/// Executor that reports each start and, when gated, waits for the test to
/// let it finish.
pub struct FakeExecutor {
    outcome: StdMutex<Outcome>,
    gate: Option<Semaphore>,
    started_tx: mpsc::UnboundedSender<String>,
    started_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    calls: StdMutex<Vec<(String, String)>>,
    interrupts: StdMutex<Vec<String>>,
}

impl FakeExecutor {
    /// Finishes immediately.
    pub fn immediate() -> Self {
        Self::build(None)
    }

    /// Waits for [`finish_one`](Self::finish_one) before finishing.
    pub fn gated() -> Self {
        Self::build(Some(Semaphore::new(0)))
    }

    fn build(gate: Option<Semaphore>) -> Self {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            outcome: StdMutex::new(Outcome::Succeed),
            gate,
            started_tx,
            started_rx: Mutex::new(started_rx),
            calls: StdMutex::new(Vec::new()),
            interrupts: StdMutex::new(Vec::new()),
        }
    }

    pub fn set_outcome(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    /// Let one gated execution finish.
    pub fn finish_one(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Wait for the next execution to start; returns the worker name.
    pub async fn next_start(&self) -> String {
        self.started_rx
            .lock()
            .await
            .recv()
            .await
            .expect("executor dropped")
    }

    /// `(worker, prompt)` of every execution, in start order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Workers that were asked to interrupt, in order.
    pub fn interrupts(&self) -> Vec<String> {
        self.interrupts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationExecutor for FakeExecutor {
    async fn execute(
        &self,
        worker: &Worker,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, ExecutionError> {
        self.calls
            .lock()
            .unwrap()
            .push((worker.name.clone(), params.prompt.clone()));
        let _ = self.started_tx.send(worker.name.clone());

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let outcome = self.outcome.lock().unwrap().clone();
        match outcome {
            Outcome::Succeed => Ok(GenerationOutput {
                worker: worker.name.clone(),
                images: vec![format!("image-for-{}", params.prompt)],
                info: "{}".into(),
            }),
            Outcome::Fail(status) => Err(ExecutionError::Remote {
                status,
                body: "CUDA out of memory".into(),
            }),
            Outcome::Hang => std::future::pending().await,
            Outcome::Panic => panic!("executor exploded"),
        }
    }

    async fn interrupt(&self, worker: &Worker) -> Result<(), ExecutionError> {
        self.interrupts.lock().unwrap().push(worker.name.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Gate and sink
// ---------------------------------------------------------------------------

/// Admission gate with a revocable deny list.
#[derive(Default)]
pub struct ToggleGate {
    denied: StdMutex<HashSet<String>>,
    budgets: StdMutex<HashMap<String, u32>>,
}

impl ToggleGate {
    pub fn revoke(&self, submitter: &str) {
        self.denied.lock().unwrap().insert(submitter.to_string());
    }

    /// Authorize `submitter` for the next `checks` checks only.
    pub fn allow_checks(&self, submitter: &str, checks: u32) {
        self.budgets
            .lock()
            .unwrap()
            .insert(submitter.to_string(), checks);
    }
}

#[async_trait]
impl AdmissionGate for ToggleGate {
    async fn is_authorized(&self, submitter: &str) -> bool {
        if self.denied.lock().unwrap().contains(submitter) {
            return false;
        }
        match self.budgets.lock().unwrap().get_mut(submitter) {
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
            None => true,
        }
    }
}

/// Status sink that records every update.
#[derive(Default)]
pub struct RecordingSink {
    updates: StdMutex<Vec<StatusUpdate>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.message.clone())
            .collect()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn notify(&self, update: StatusUpdate) -> Result<(), StatusDeliveryError> {
        self.updates.lock().unwrap().push(update);
        Ok(())
    }
}

/// Status sink that panics on any message starting with `prefix`.
pub struct PanickingSink {
    pub prefix: &'static str,
}

#[async_trait]
impl StatusSink for PanickingSink {
    async fn notify(&self, update: StatusUpdate) -> Result<(), StatusDeliveryError> {
        if update.message.starts_with(self.prefix) {
            panic!("status sink exploded on {:?}", update.message);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn descriptor(name: &str) -> WorkerDescriptor {
    WorkerDescriptor {
        name: name.to_string(),
        endpoint: format!("http://{name}:7860"),
        checkpoints: Vec::new(),
        loras: Vec::new(),
    }
}

/// Registry over `names`, backed by `probe`. Not yet refreshed.
pub fn registry(probe: Arc<FakeProbe>, names: &[&str]) -> Arc<WorkerRegistry> {
    let descriptors: Vec<_> = names.iter().map(|n| descriptor(n)).collect();
    Arc::new(WorkerRegistry::new(
        &descriptors,
        probe,
        Duration::from_secs(5),
    ))
}

pub fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        execution_timeout: Duration::from_secs(900),
        retry_ceiling: 10,
        retry_backoff: Duration::from_secs(5),
        reschedule_delay: Duration::from_secs(30),
    }
}

/// Everything a dispatcher test needs.
pub struct Harness {
    pub probe: Arc<FakeProbe>,
    pub registry: Arc<WorkerRegistry>,
    pub executor: Arc<FakeExecutor>,
    pub gate: Arc<ToggleGate>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    /// Workers `names`, with `online` of them probed online on `checkpoint`.
    pub async fn new(
        names: &[&str],
        online: &[(&str, &str)],
        executor: FakeExecutor,
        config: DispatchConfig,
    ) -> Self {
        let probe = Arc::new(FakeProbe::default());
        for (worker, checkpoint) in online {
            probe.online(worker, checkpoint);
        }
        let registry = registry(Arc::clone(&probe), names);
        registry.refresh_all().await;

        let executor = Arc::new(executor);
        let gate = Arc::new(ToggleGate::default());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            executor.clone(),
            gate.clone(),
            config,
        );

        Self {
            probe,
            registry,
            executor,
            gate,
            dispatcher,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        rate_limit_max: 3,
        admin_submitters: vec!["root".to_string()],
        dispatch: dispatch_config(),
        ..ServerConfig::default()
    }
}

/// App wired to fakes: the HTTP router plus handles on the collaborators.
pub struct TestApp {
    pub router: Router,
    pub probe: Arc<FakeProbe>,
    pub executor: Arc<FakeExecutor>,
    pub state: AppState,
}

/// Build the full application router over fake workers, using the same
/// middleware stack production uses.
pub async fn build_test_app(names: &[&str], online: &[(&str, &str)]) -> TestApp {
    let config = test_config();
    let probe = Arc::new(FakeProbe::default());
    for (worker, checkpoint) in online {
        probe.online(worker, checkpoint);
    }
    let registry = registry(Arc::clone(&probe), names);
    registry.refresh_all().await;

    let permissions = Arc::new(
        PermissionGate::new(config.default_permission_level, config.generate_min_level)
            .with_levels(
                config
                    .admin_submitters
                    .iter()
                    .map(|id| (id.clone(), PermissionLevel::Admin)),
            ),
    );
    let executor = Arc::new(FakeExecutor::immediate());
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        executor.clone(),
        permissions.clone(),
        config.dispatch.clone(),
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        dispatcher,
        permissions,
        rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
            config.rate_limit_max,
            config.rate_limit_window,
        ))),
    };

    TestApp {
        router: build_app_router(state.clone(), &config),
        probe,
        executor,
        state,
    }
}

pub async fn get(app: Router, uri: &str, submitter: Option<&str>) -> Response {
    send(app, Method::GET, uri, submitter, None).await
}

pub async fn post_json(
    app: Router,
    uri: &str,
    submitter: Option<&str>,
    body: serde_json::Value,
) -> Response {
    send(app, Method::POST, uri, submitter, Some(body)).await
}

pub async fn put_json(
    app: Router,
    uri: &str,
    submitter: Option<&str>,
    body: serde_json::Value,
) -> Response {
    send(app, Method::PUT, uri, submitter, Some(body)).await
}

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    submitter: Option<&str>,
    body: Option<serde_json::Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(id) = submitter {
        builder = builder.header(SUBMITTER_HEADER, id);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
