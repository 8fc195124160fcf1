//! Wire types for the `/sdapi/v1` endpoints.
//!
//! Only the fields the dispatcher needs are modelled; everything else the
//! web UI sends back is ignored on deserialization.

use sdqueue_core::worker_pool::ExtensionInfo;
use serde::{Deserialize, Serialize};

/// Text-to-image generation parameters.
///
/// Optional fields are omitted from the payload when `None` so the worker
/// applies its own defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_iter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiling: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_hr: Option<bool>,
    /// Extension script arguments (e.g. ControlNet units), passed through as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alwayson_scripts: Option<serde_json::Value>,
}

impl GenerationParams {
    /// Minimal parameters: a prompt and a step count.
    pub fn new(prompt: impl Into<String>, steps: u32) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            steps,
            seed: None,
            sampler_name: None,
            scheduler: None,
            batch_size: None,
            n_iter: None,
            cfg_scale: None,
            width: None,
            height: None,
            tiling: None,
            enable_hr: None,
            alwayson_scripts: None,
        }
    }
}

/// Body of `POST /sdapi/v1/txt2img`.
#[derive(Debug, Clone, Serialize)]
pub struct Txt2ImgRequest<'a> {
    #[serde(flatten)]
    pub params: &'a GenerationParams,
    /// Return images inline as base64.
    pub send_images: bool,
    /// Do not write images to the worker's disk.
    pub save_images: bool,
}

impl<'a> Txt2ImgRequest<'a> {
    pub fn new(params: &'a GenerationParams) -> Self {
        Self {
            params,
            send_images: true,
            save_images: false,
        }
    }
}

/// Response of `POST /sdapi/v1/txt2img`.
#[derive(Debug, Clone, Deserialize)]
pub struct Txt2ImgResponse {
    /// Base64-encoded PNG images.
    #[serde(default)]
    pub images: Vec<String>,
    /// JSON-encoded generation info string (seed, sampler, ...).
    #[serde(default)]
    pub info: String,
}

/// The subset of `GET /sdapi/v1/options` used for probing.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionsResponse {
    /// Raw loaded checkpoint title, e.g. `"model.safetensors [89ff21]"`.
    #[serde(default)]
    pub sd_model_checkpoint: Option<String>,
}

/// One entry of `GET /sdapi/v1/extensions`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionResponse {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<ExtensionResponse> for ExtensionInfo {
    fn from(ext: ExtensionResponse) -> Self {
        Self {
            name: ext.name,
            enabled: ext.enabled,
        }
    }
}
