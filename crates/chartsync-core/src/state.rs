//! Orchestrator state shared with callers.

use serde::{Deserialize, Serialize};

/// Orchestrator state. A pass moves `Idle -> Syncing -> {Idle, Error}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        }
    }

    /// State after a pass finished.
    pub const fn after_pass(succeeded: bool) -> Self {
        if succeeded {
            Self::Idle
        } else {
            Self::Error
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
