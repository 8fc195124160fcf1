//! Admission gate: who may generate.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use sdqueue_core::permissions::PermissionLevel;

/// Boolean authorization check consulted at submission and again right
/// before execution.
#[async_trait]
pub trait AdmissionGate: Send + Sync {
    async fn is_authorized(&self, submitter: &str) -> bool;
}

/// Permission-level store.
///
/// Submitters without an explicit level get `default_level`; a submitter is
/// authorized when their level meets `required_level`.
pub struct PermissionGate {
    levels: RwLock<HashMap<String, PermissionLevel>>,
    default_level: PermissionLevel,
    required_level: PermissionLevel,
}

impl PermissionGate {
    pub fn new(default_level: PermissionLevel, required_level: PermissionLevel) -> Self {
        Self {
            levels: RwLock::new(HashMap::new()),
            default_level,
            required_level,
        }
    }

    /// Seed explicit levels, e.g. configured admins.
    pub fn with_levels(
        mut self,
        levels: impl IntoIterator<Item = (String, PermissionLevel)>,
    ) -> Self {
        self.levels.get_mut().extend(levels);
        self
    }

    pub async fn level_of(&self, submitter: &str) -> PermissionLevel {
        self.levels
            .read()
            .await
            .get(submitter)
            .copied()
            .unwrap_or(self.default_level)
    }

    /// Set an explicit level, returning the previous effective level.
    pub async fn set_level(&self, submitter: &str, level: PermissionLevel) -> PermissionLevel {
        let previous = self
            .levels
            .write()
            .await
            .insert(submitter.to_string(), level)
            .unwrap_or(self.default_level);
        tracing::info!(
            submitter = %submitter,
            from = %previous,
            to = %level,
            "Permission level changed",
        );
        previous
    }

    /// Block a submitter from generating.
    pub async fn revoke(&self, submitter: &str) {
        self.set_level(submitter, PermissionLevel::Denied).await;
    }

    pub fn required_level(&self) -> PermissionLevel {
        self.required_level
    }
}

#[async_trait]
impl AdmissionGate for PermissionGate {
    async fn is_authorized(&self, submitter: &str) -> bool {
        self.level_of(submitter).await.allows(self.required_level)
    }
}
