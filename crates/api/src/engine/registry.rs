//! Worker registry: the single source of truth for worker state.
//!
//! [`WorkerRegistry`] owns one [`Worker`] record per configured worker, in
//! configuration order, for the lifetime of the process. Workers are never
//! removed; an unreachable worker stays present with `online = false` and
//! is skipped by the matcher.
//!
//! All mutation happens under one `RwLock`, so readers always get a
//! consistent snapshot and busy-flag claims are atomic compare-and-set
//! operations.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::RwLock;

use sdqueue_core::checkpoint::normalize_optional;
use sdqueue_core::worker_pool::{Feature, Worker, WorkerDescriptor};

use crate::engine::probe::{ProbeError, ProbeReport, WorkerProbe};

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The named worker is not configured.
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),
}

/// One entry of the checkpoint catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointAvailability {
    /// Normalized checkpoint name.
    pub name: String,
    /// Online workers that advertise or currently have it loaded.
    pub workers: Vec<String>,
}

/// Thread-safe registry of worker state.
pub struct WorkerRegistry {
    workers: RwLock<Vec<Worker>>,
    probe: Arc<dyn WorkerProbe>,
    probe_timeout: Duration,
}

impl WorkerRegistry {
    /// Build a registry from static configuration. All workers start offline
    /// and idle until the first [`refresh_all`](Self::refresh_all).
    pub fn new(
        descriptors: &[WorkerDescriptor],
        probe: Arc<dyn WorkerProbe>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            workers: RwLock::new(descriptors.iter().map(Worker::from_descriptor).collect()),
            probe,
            probe_timeout,
        }
    }

    /// Probe every worker concurrently and record the results.
    ///
    /// Each probe is bounded by the registry's probe timeout, and each
    /// result is applied as soon as it arrives, so one slow worker never
    /// delays the others. Probe failures degrade that worker to offline and
    /// are logged; they are never returned.
    pub async fn refresh_all(&self) {
        let targets = self.snapshot().await;
        tracing::debug!(count = targets.len(), "Refreshing worker status");

        let mut probes: FuturesUnordered<_> = targets
            .iter()
            .map(|worker| async move {
                let result =
                    match tokio::time::timeout(self.probe_timeout, self.probe.probe(worker)).await {
                        Ok(result) => result,
                        Err(_) => Err(ProbeError::Timeout(self.probe_timeout)),
                    };
                (worker.name.as_str(), result)
            })
            .collect();

        while let Some((name, result)) = probes.next().await {
            self.apply_probe(name, result).await;
        }

        self.log_status().await;
    }

    /// Snapshot of all currently online workers, in configuration order.
    pub async fn list_online(&self) -> Vec<Worker> {
        self.workers
            .read()
            .await
            .iter()
            .filter(|w| w.online)
            .cloned()
            .collect()
    }

    /// Snapshot of every configured worker, online or not.
    pub async fn snapshot(&self) -> Vec<Worker> {
        self.workers.read().await.clone()
    }

    /// Look up a single worker by name.
    pub async fn get(&self, name: &str) -> Option<Worker> {
        self.workers
            .read()
            .await
            .iter()
            .find(|w| w.name == name)
            .cloned()
    }

    pub async fn online_count(&self) -> usize {
        self.workers.read().await.iter().filter(|w| w.online).count()
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// Atomically move a worker's busy flag to `desired`.
    ///
    /// Returns `Ok(true)` only if the flag actually changed, so among any
    /// number of concurrent `try_set_busy(name, true)` calls exactly one
    /// succeeds until the worker is released.
    pub async fn try_set_busy(&self, name: &str, desired: bool) -> Result<bool, RegistryError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .iter_mut()
            .find(|w| w.name == name)
            .ok_or_else(|| RegistryError::UnknownWorker(name.to_string()))?;

        if worker.busy == desired {
            return Ok(false);
        }
        worker.busy = desired;
        tracing::debug!(worker = %name, busy = desired, "Worker busy state changed");
        Ok(true)
    }

    /// Clear a worker's busy flag. Idempotent; unknown names are logged.
    pub async fn release(&self, name: &str) {
        let mut workers = self.workers.write().await;
        match workers.iter_mut().find(|w| w.name == name) {
            Some(worker) => {
                worker.busy = false;
                tracing::debug!(worker = %name, "Released worker");
            }
            None => {
                tracing::warn!(worker = %name, "Attempted to release unknown worker");
            }
        }
    }

    /// Checkpoints available on online workers, each with the workers
    /// serving it, in first-seen (configuration) order.
    ///
    /// Combines the operator-advertised checkpoints with the one each
    /// worker currently has loaded.
    pub async fn available_checkpoints(&self) -> Vec<CheckpointAvailability> {
        let workers = self.workers.read().await;
        let mut catalog: Vec<CheckpointAvailability> = Vec::new();

        for worker in workers.iter().filter(|w| w.online) {
            let names = worker
                .checkpoints
                .iter()
                .chain(worker.current_checkpoint.iter());
            for name in names {
                match catalog.iter_mut().find(|c| &c.name == name) {
                    Some(entry) => {
                        if !entry.workers.contains(&worker.name) {
                            entry.workers.push(worker.name.clone());
                        }
                    }
                    None => catalog.push(CheckpointAvailability {
                        name: name.clone(),
                        workers: vec![worker.name.clone()],
                    }),
                }
            }
        }

        catalog
    }

    // ---- private helpers ----

    /// Record one probe outcome.
    ///
    /// The busy flag is left untouched in both branches: it belongs to
    /// whichever execution claimed the worker and is cleared by that
    /// execution's cleanup.
    async fn apply_probe(&self, name: &str, result: Result<ProbeReport, ProbeError>) {
        let mut workers = self.workers.write().await;
        let Some(worker) = workers.iter_mut().find(|w| w.name == name) else {
            return;
        };
        let was_online = worker.online;
        worker.last_checked = Some(chrono::Utc::now());

        match result {
            Ok(report) => {
                let checkpoint = normalize_optional(report.checkpoint.as_deref());
                let mut features: Vec<Feature> = report
                    .extensions
                    .iter()
                    .filter(|e| e.enabled)
                    .filter_map(|e| Feature::from_extension_name(&e.name))
                    .collect();
                features.sort();
                features.dedup();

                if !was_online {
                    tracing::info!(
                        worker = %name,
                        checkpoint = checkpoint.as_deref().unwrap_or("<none>"),
                        "Worker is online",
                    );
                } else if worker.current_checkpoint != checkpoint {
                    tracing::info!(
                        worker = %name,
                        from = worker.current_checkpoint.as_deref().unwrap_or("<none>"),
                        to = checkpoint.as_deref().unwrap_or("<none>"),
                        "Worker switched checkpoint",
                    );
                }

                worker.online = true;
                worker.current_checkpoint = checkpoint;
                worker.features = features;
                worker.extensions = report.extensions;
            }
            Err(e) => {
                if was_online {
                    tracing::warn!(worker = %name, error = %e, "Worker went offline");
                } else {
                    tracing::debug!(worker = %name, error = %e, "Worker still offline");
                }
                worker.online = false;
                worker.current_checkpoint = None;
                worker.features.clear();
                worker.extensions.clear();
            }
        }
    }

    async fn log_status(&self) {
        for w in self.workers.read().await.iter() {
            tracing::debug!(
                worker = %w.name,
                online = w.online,
                checkpoint = w.current_checkpoint.as_deref().unwrap_or("<none>"),
                busy = w.busy,
                "Worker status",
            );
        }
    }
}
