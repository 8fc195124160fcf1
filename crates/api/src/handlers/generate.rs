//! Image generation intake.
//!
//! `POST /api/v1/generate` admits a job, waits for its resolution and
//! returns the images together with every status message the job emitted.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use sdqueue_core::affinity::Requirements;
use sdqueue_core::error::CoreError;
use sdqueue_core::permissions::PermissionLevel;
use sdqueue_core::scheduling::{PRIORITY_BACKGROUND, PRIORITY_NORMAL, PRIORITY_URGENT};
use sdqueue_core::types::JobId;
use sdqueue_core::worker_pool::Feature;
use sdqueue_sdapi::GenerationParams;

use crate::engine::admission::AdmissionGate;
use crate::engine::job::{ChannelSink, JobError, JobRequest, StatusUpdate};
use crate::error::{AppError, AppResult};
use crate::middleware::submitter::Submitter;
use crate::response::DataResponse;
use crate::state::AppState;

const STEPS_RANGE: std::ops::RangeInclusive<u32> = 1..=60;
const SIZE_RANGE: std::ops::RangeInclusive<u32> = 512..=1024;
const CFG_RANGE: std::ops::RangeInclusive<f64> = 1.0..=10.0;

const DEFAULT_SIZE: u32 = 1024;
const DEFAULT_CFG_SCALE: f64 = 2.0;
const DEFAULT_SAMPLER: &str = "DPM++ SDE";

/// Request body for `POST /api/v1/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateInput {
    pub prompt: String,
    pub steps: u32,
    /// Checkpoint to run on; omitted means any worker with a loaded model.
    pub checkpoint: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub cfg_scale: Option<f64>,
    pub sampler: Option<String>,
    pub seed: Option<i64>,
    /// Optional feature the worker must have enabled.
    pub feature: Option<Feature>,
    /// `urgent`, `normal` (default) or `background`.
    pub priority: Option<PriorityClass>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    Urgent,
    Normal,
    Background,
}

impl PriorityClass {
    pub fn value(self) -> i32 {
        match self {
            Self::Urgent => PRIORITY_URGENT,
            Self::Normal => PRIORITY_NORMAL,
            Self::Background => PRIORITY_BACKGROUND,
        }
    }
}

/// Response payload of a completed generation.
#[derive(Debug, Serialize)]
pub struct GenerateOutput {
    pub job_id: JobId,
    pub worker: String,
    /// Base64-encoded PNG images.
    pub images: Vec<String>,
    pub info: String,
    /// Status messages in emission order.
    pub status: Vec<StatusUpdate>,
}

/// Validate the input and build the generation parameters, applying the
/// intake defaults.
pub fn validate_input(input: &GenerateInput) -> Result<GenerationParams, CoreError> {
    let prompt = input.prompt.trim();
    if prompt.is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".into()));
    }
    if !STEPS_RANGE.contains(&input.steps) {
        return Err(CoreError::Validation(format!(
            "Steps must be between {} and {}",
            STEPS_RANGE.start(),
            STEPS_RANGE.end()
        )));
    }

    let width = input.width.unwrap_or(DEFAULT_SIZE);
    let height = input.height.unwrap_or(DEFAULT_SIZE);
    for (label, value) in [("Width", width), ("Height", height)] {
        if !SIZE_RANGE.contains(&value) {
            return Err(CoreError::Validation(format!(
                "{label} must be between {} and {}",
                SIZE_RANGE.start(),
                SIZE_RANGE.end()
            )));
        }
    }

    let cfg_scale = input.cfg_scale.unwrap_or(DEFAULT_CFG_SCALE);
    if !CFG_RANGE.contains(&cfg_scale) {
        return Err(CoreError::Validation(format!(
            "CFG scale must be between {} and {}",
            CFG_RANGE.start(),
            CFG_RANGE.end()
        )));
    }

    let mut params = GenerationParams::new(prompt, input.steps);
    params.negative_prompt = input
        .negative_prompt
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    params.width = Some(width);
    params.height = Some(height);
    params.cfg_scale = Some(cfg_scale);
    params.sampler_name = Some(
        input
            .sampler
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SAMPLER.to_string()),
    );
    params.seed = input.seed;
    Ok(params)
}

/// Requirements derived from the input.
pub fn requirements_for(input: &GenerateInput) -> Requirements {
    let base = match input.checkpoint.as_deref() {
        Some(raw) => Requirements::for_checkpoint(raw),
        None => Requirements::any(),
    };
    match input.feature {
        Some(feature) => base.with_feature(feature),
        None => base,
    }
}

/// POST /api/v1/generate
///
/// Checks, in order: input validity, permission, rate limit, and whether
/// any online worker could ever serve the request. Then admits the job and
/// waits for it.
pub async fn generate(
    Submitter(submitter): Submitter,
    State(state): State<AppState>,
    Json(input): Json<GenerateInput>,
) -> AppResult<impl IntoResponse> {
    let params = validate_input(&input)?;
    let requirements = requirements_for(&input);

    if !state.permissions.is_authorized(&submitter).await {
        return Err(AppError::Job(JobError::NotAuthorized { submitter }));
    }

    let priority = input.priority.unwrap_or(PriorityClass::Normal);
    if priority == PriorityClass::Urgent
        && !state
            .permissions
            .level_of(&submitter)
            .await
            .allows(PermissionLevel::Moderator)
    {
        return Err(AppError::Core(CoreError::Forbidden(
            "Urgent priority requires moderator level".into(),
        )));
    }

    {
        let now = chrono::Utc::now();
        let mut limiter = state.rate_limiter.lock().await;
        if !limiter.check(&submitter, now) {
            let cooldown = limiter.remaining_cooldown(&submitter, now);
            let retry_after_secs = cooldown.as_secs() + u64::from(cooldown.subsec_nanos() > 0);
            tracing::info!(submitter = %submitter, retry_after_secs, "Submission rate limited");
            return Err(AppError::RateLimited { retry_after_secs });
        }
    }

    state.dispatcher.check_availability(&requirements).await?;

    let (sink, mut status_rx) = ChannelSink::pair();
    let request = JobRequest {
        submitter,
        priority: priority.value(),
        requirements,
        params,
    };
    let handle = state.dispatcher.submit(request, Arc::new(sink)).await?;
    let job_id = handle.id;

    let output = handle.wait().await?;

    let mut status = Vec::new();
    while let Ok(update) = status_rx.try_recv() {
        status.push(update);
    }

    Ok(Json(DataResponse {
        data: GenerateOutput {
            job_id,
            worker: output.worker,
            images: output.images,
            info: output.info,
            status,
        },
    }))
}
