//! Worker data model and static-configuration validation.
//!
//! [`WorkerDescriptor`] is what the operator writes in the workers file;
//! [`Worker`] is the registry's full view, descriptor plus the dynamic
//! state learned from probes and the locally tracked busy flag.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::checkpoint::normalize_checkpoint;
use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of a worker name.
const MAX_NAME_LEN: usize = 128;

/// Maximum number of advertised checkpoints per worker.
const MAX_CHECKPOINTS: usize = 256;

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// Optional capabilities a worker may have enabled through extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    /// Auxiliary conditioning (pose, depth, canny, ...).
    ControlNet,
    /// Automatic face/hand inpainting pass.
    ADetailer,
}

impl Feature {
    /// Map a web UI extension name to the feature it provides.
    ///
    /// Matching is case-insensitive on the well-known repository names.
    pub fn from_extension_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.contains("controlnet") {
            Some(Self::ControlNet)
        } else if lower.contains("adetailer") {
            Some(Self::ADetailer)
        } else {
            None
        }
    }
}

/// Extension metadata as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub name: String,
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Descriptor / Worker
// ---------------------------------------------------------------------------

/// Static worker configuration, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Unique display name, also the registry key.
    pub name: String,
    /// Base HTTP URL, e.g. `http://192.168.1.118:7860`.
    #[serde(alias = "url")]
    pub endpoint: String,
    /// Checkpoints the operator says this worker can serve.
    #[serde(default)]
    pub checkpoints: Vec<String>,
    /// Auxiliary assets (LoRAs) installed on the worker.
    #[serde(default)]
    pub loras: Vec<String>,
}

/// Full registry view of a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Worker {
    pub name: String,
    pub endpoint: String,
    /// Normalized advertised checkpoints (from configuration).
    pub checkpoints: Vec<String>,
    pub loras: Vec<String>,
    pub online: bool,
    pub last_checked: Option<Timestamp>,
    /// Normalized checkpoint currently loaded, `None` when offline or unknown.
    pub current_checkpoint: Option<String>,
    pub features: Vec<Feature>,
    pub extensions: Vec<ExtensionInfo>,
    pub busy: bool,
}

impl Worker {
    /// Build the initial (offline, idle) state for a configured worker.
    pub fn from_descriptor(descriptor: &WorkerDescriptor) -> Self {
        let mut checkpoints: Vec<String> = Vec::with_capacity(descriptor.checkpoints.len());
        for raw in &descriptor.checkpoints {
            if let Some(normalized) = normalize_checkpoint(raw) {
                if !checkpoints.contains(&normalized) {
                    checkpoints.push(normalized);
                }
            }
        }

        Self {
            name: descriptor.name.clone(),
            endpoint: descriptor.endpoint.trim_end_matches('/').to_string(),
            checkpoints,
            loras: descriptor
                .loras
                .iter()
                .filter(|l| !l.trim().is_empty())
                .cloned()
                .collect(),
            online: false,
            last_checked: None,
            current_checkpoint: None,
            features: Vec::new(),
            extensions: Vec::new(),
            busy: false,
        }
    }

    /// Whether the worker currently has the given feature enabled.
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a worker name.
///
/// Rules:
/// - Must not be empty or blank.
/// - Must not exceed `MAX_NAME_LEN` characters.
/// - Alphanumeric, space, hyphen, underscore, dot and parentheses only.
pub fn validate_worker_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation(
            "Worker name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Worker name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '(' | ')'))
    {
        return Err(CoreError::Validation(format!(
            "Worker name \"{name}\" contains unsupported characters"
        )));
    }
    Ok(())
}

/// Validate a single descriptor.
pub fn validate_descriptor(descriptor: &WorkerDescriptor) -> Result<(), CoreError> {
    validate_worker_name(&descriptor.name)?;

    let endpoint = descriptor.endpoint.trim();
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Err(CoreError::Validation(format!(
            "Worker \"{}\" endpoint must be an http(s) URL",
            descriptor.name
        )));
    }
    if descriptor.checkpoints.len() > MAX_CHECKPOINTS {
        return Err(CoreError::Validation(format!(
            "Worker \"{}\" advertises more than {MAX_CHECKPOINTS} checkpoints",
            descriptor.name
        )));
    }
    Ok(())
}

/// Validate the complete worker list: each descriptor, plus name uniqueness.
pub fn validate_descriptors(descriptors: &[WorkerDescriptor]) -> Result<(), CoreError> {
    let mut seen = HashSet::with_capacity(descriptors.len());
    for descriptor in descriptors {
        validate_descriptor(descriptor)?;
        if !seen.insert(descriptor.name.as_str()) {
            return Err(CoreError::Conflict(format!(
                "Duplicate worker name: \"{}\"",
                descriptor.name
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
