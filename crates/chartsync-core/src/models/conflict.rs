//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resource::{Resource, ResourceKey};
use crate::error::Error;

/// How a divergence between local and remote copies is settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    LocalWins,
    RemoteWins,
    #[default]
    LastWriteWins,
    Merge,
    Manual,
    Custom,
}

impl ConflictStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalWins => "local-wins",
            Self::RemoteWins => "remote-wins",
            Self::LastWriteWins => "last-write-wins",
            Self::Merge => "merge",
            Self::Manual => "manual",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local-wins" | "local" => Ok(Self::LocalWins),
            "remote-wins" | "remote" => Ok(Self::RemoteWins),
            "last-write-wins" | "lww" => Ok(Self::LastWriteWins),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            "custom" => Ok(Self::Custom),
            other => Err(Error::InvalidInput(format!(
                "unknown conflict strategy {other:?}"
            ))),
        }
    }
}

/// Decision produced by the conflict resolver (or supplied by a user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub strategy: ConflictStrategy,
    pub winning_resource: Resource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_resource: Option<Resource>,
    pub reason: String,
}

impl Resolution {
    pub fn local_wins(local: &Resource, reason: impl Into<String>) -> Self {
        Self {
            strategy: ConflictStrategy::LocalWins,
            winning_resource: local.clone(),
            merged_resource: None,
            reason: reason.into(),
        }
    }

    pub fn remote_wins(remote: &Resource, reason: impl Into<String>) -> Self {
        Self {
            strategy: ConflictStrategy::RemoteWins,
            winning_resource: remote.clone(),
            merged_resource: None,
            reason: reason.into(),
        }
    }

    /// The representation that should end up on both sides.
    pub fn final_resource(&self) -> &Resource {
        self.merged_resource
            .as_ref()
            .unwrap_or(&self.winning_resource)
    }

    /// True when applying this resolution needs no write to the remote.
    pub fn keeps_remote(&self, remote: &Resource) -> bool {
        self.final_resource() == remote
    }
}

/// A detected divergence between local and remote copies of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub local_resource: Resource,
    pub remote_resource: Resource,
    /// Local lineage version at detection time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_version: Option<u64>,
    /// Remote version at detection time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<u64>,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl SyncConflict {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type.clone(), self.resource_id.clone())
    }

    pub const fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Record a resolution. Resolved conflicts are kept for audit.
    pub fn resolve(&mut self, resolution: Resolution, by: impl Into<String>, at: DateTime<Utc>) {
        self.resolution = Some(resolution);
        self.resolved_by = Some(by.into());
        self.resolved_at = Some(at);
    }
}
