//! Full-state dump and restore for backup or device migration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{Collection, Store, StoreExt, WriteBatch};
use crate::error::{Error, Result};
use crate::models::{Resource, ResourceVersion, SyncConflict, SyncQueueItem};

/// Current layout of [`SyncDataExport`].
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Everything the engine persists, in one serializable document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDataExport {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub queue: Vec<SyncQueueItem>,
    #[serde(default)]
    pub versions: Vec<ResourceVersion>,
    #[serde(default)]
    pub conflicts: Vec<SyncConflict>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl SyncDataExport {
    /// Snapshot every collection of `store`.
    pub fn capture(store: &dyn Store, exported_at: DateTime<Utc>) -> Result<Self> {
        let mut queue: Vec<SyncQueueItem> = store.scan_json(Collection::Queue)?;
        queue.sort_by_key(|item| item.sequence);

        let metadata = store
            .scan(Collection::Metadata)?
            .into_iter()
            .map(|(key, raw)| Ok((key, serde_json::from_str(&raw)?)))
            .collect::<Result<BTreeMap<String, Value>>>()?;

        Ok(Self {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at,
            queue,
            versions: store.scan_json(Collection::Versions)?,
            conflicts: store.scan_json(Collection::Conflicts)?,
            resources: store.scan_json(Collection::ResourceCache)?,
            metadata,
        })
    }

    /// Parse and check an export document.
    pub fn from_json(payload: &str) -> Result<Self> {
        let export: Self = serde_json::from_str(payload)?;
        export.validate()?;
        Ok(export)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.format_version == 0 || self.format_version > EXPORT_FORMAT_VERSION {
            return Err(Error::InvalidInput(format!(
                "unsupported export format version {}",
                self.format_version
            )));
        }
        if let Some(item) = self
            .queue
            .iter()
            .find(|item| item.resource_type.trim().is_empty())
        {
            return Err(Error::InvalidInput(format!(
                "queue item {} has no resource type",
                item.id
            )));
        }
        Ok(())
    }

    /// Build one batch that replaces the contents of `store` with this
    /// document. Committing it is all-or-nothing.
    pub fn restore_batch(&self, store: &dyn Store) -> Result<WriteBatch> {
        self.validate()?;
        let mut batch = WriteBatch::new();
        for collection in Collection::ALL {
            for (key, _) in store.scan(collection)? {
                batch.delete(collection, key);
            }
        }

        for item in &self.queue {
            batch.put(Collection::Queue, item.id.clone(), item)?;
        }
        for record in &self.versions {
            batch.put(Collection::Versions, record.key().storage_key(), record)?;
        }
        for conflict in &self.conflicts {
            batch.put(Collection::Conflicts, conflict.id.clone(), conflict)?;
        }
        for resource in &self.resources {
            batch.put(Collection::ResourceCache, resource.key().storage_key(), resource)?;
        }
        for (key, value) in &self.metadata {
            batch.put(Collection::Metadata, key.clone(), value)?;
        }
        Ok(batch)
    }
}

/// Deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(timestamp_ms: i64) -> String {
    format!("chartsync-export-{timestamp_ms}.json")
}
