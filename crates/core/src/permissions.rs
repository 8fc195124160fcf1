//! Permission levels used by the admission gate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Ordered permission levels. Comparisons follow declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Explicitly blocked from generating.
    Denied,
    User,
    Trusted,
    Moderator,
    Admin,
}

impl PermissionLevel {
    /// Whether this level meets `required`.
    pub fn allows(self, required: PermissionLevel) -> bool {
        self >= required
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Denied => "denied",
            Self::User => "user",
            Self::Trusted => "trusted",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = CoreError;

    /// Accepts the level names (case-insensitive) and the numeric levels
    /// 0-3 used by chat role commands (User=0 .. Admin=3).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "denied" | "-1" => Ok(Self::Denied),
            "user" | "0" => Ok(Self::User),
            "trusted" | "1" => Ok(Self::Trusted),
            "moderator" | "2" => Ok(Self::Moderator),
            "admin" | "3" => Ok(Self::Admin),
            other => Err(CoreError::Validation(format!(
                "Unknown permission level: \"{other}\""
            ))),
        }
    }
}
