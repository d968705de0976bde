//! Thread execution policy
//!
//! Owned and persisted by the thread-management collaborator; the engine only
//! reads it when deciding whether a destructive command may be admitted.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a thread treats destructive commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionPolicy {
    /// Destructive commands are always rejected
    Safe,

    /// Destructive commands run without asking
    #[default]
    Normal,

    /// Destructive commands need explicit confirmation on submission
    DangerConfirm,
}

impl ExecutionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPolicy::Safe => "safe",
            ExecutionPolicy::Normal => "normal",
            ExecutionPolicy::DangerConfirm => "danger-confirm",
        }
    }
}

impl std::fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "normal" => Ok(Self::Normal),
            "danger-confirm" | "danger_confirm" | "dangerconfirm" => Ok(Self::DangerConfirm),
            other => Err(Error::InvalidInput(format!(
                "unknown execution policy '{}' (expected safe, normal or danger-confirm)",
                other
            ))),
        }
    }
}
