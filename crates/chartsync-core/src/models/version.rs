//! Resource version lineage model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resource::{Resource, ResourceKey};

/// Authoritative local view of a resource's version lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceVersion {
    pub resource_type: String,
    pub resource_id: String,
    /// Starts at 1 and only increases
    pub version: u64,
    /// Last version confirmed by the server, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<u64>,
    pub last_modified: DateTime<Utc>,
    pub checksum: String,
}

impl ResourceVersion {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type.clone(), self.resource_id.clone())
    }
}

/// The version/timestamp pair used for divergence checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionStamp {
    pub version: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl VersionStamp {
    /// Stamp carried by a resource's metadata envelope.
    pub const fn of(resource: &Resource) -> Self {
        Self {
            version: resource.meta.version_id,
            last_modified: resource.meta.last_updated,
        }
    }

    /// Stamp made only of the remote version a local change was based on.
    pub const fn base(remote_version: Option<u64>) -> Self {
        Self {
            version: remote_version,
            last_modified: None,
        }
    }
}
