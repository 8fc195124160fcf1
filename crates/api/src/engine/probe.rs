//! Worker liveness and capability probing.
//!
//! [`WorkerProbe`] is the seam the registry refreshes through;
//! [`SdApiProber`] is the production implementation talking to the
//! worker's `/sdapi/v1` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use sdqueue_core::worker_pool::{ExtensionInfo, Worker};
use sdqueue_sdapi::SdApi;

/// What a successful probe learned about a worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    /// Raw loaded checkpoint title as reported (normalized by the registry).
    pub checkpoint: Option<String>,
    /// Installed extensions; empty when the extension listing failed.
    pub extensions: Vec<ExtensionInfo>,
}

/// Why a worker could not be probed.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Worker unreachable: {0}")]
    Unreachable(String),

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Checks one worker's reachability and capabilities.
#[async_trait]
pub trait WorkerProbe: Send + Sync {
    async fn probe(&self, worker: &Worker) -> Result<ProbeReport, ProbeError>;
}

/// Probes workers over HTTP.
///
/// Reachability and the loaded checkpoint come from `GET /sdapi/v1/options`;
/// optional features come from `GET /sdapi/v1/extensions`. Both requests are
/// issued concurrently. Only the first decides liveness.
pub struct SdApiProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl SdApiProber {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl WorkerProbe for SdApiProber {
    async fn probe(&self, worker: &Worker) -> Result<ProbeReport, ProbeError> {
        let api = SdApi::with_client(self.client.clone(), worker.endpoint.clone());

        let (options, extensions) = tokio::join!(
            api.get_options(self.timeout),
            api.list_extensions(self.timeout)
        );

        let options = options.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(self.timeout)
            } else {
                ProbeError::Unreachable(e.to_string())
            }
        })?;

        let extensions = match extensions {
            Ok(list) => list.into_iter().map(ExtensionInfo::from).collect(),
            Err(e) => {
                tracing::warn!(
                    worker = %worker.name,
                    error = %e,
                    "Extension listing failed, assuming no optional features",
                );
                Vec::new()
            }
        };

        Ok(ProbeReport {
            checkpoint: options.sd_model_checkpoint,
            extensions,
        })
    }
}
