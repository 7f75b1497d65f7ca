//! Resource version tracker
//!
//! Sole owner of local version numbers. Lineage records survive deletes so a
//! re-created resource keeps counting upward; only a full local wipe resets
//! them.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::{Collection, Store, StoreExt, WriteBatch};
use crate::error::Result;
use crate::models::{ResourceKey, ResourceVersion, VersionStamp};

pub struct VersionTracker {
    store: Arc<dyn Store>,
}

impl VersionTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn current(&self, key: &ResourceKey) -> Result<Option<ResourceVersion>> {
        self.store
            .get_json(Collection::Versions, &key.storage_key())
    }

    /// `current + 1`, or 1 for a resource never seen before.
    pub fn next_version(&self, key: &ResourceKey) -> Result<u64> {
        Ok(self
            .current(key)?
            .map_or(1, |record| record.version.saturating_add(1)))
    }

    pub fn all(&self) -> Result<Vec<ResourceVersion>> {
        self.store.scan_json(Collection::Versions)
    }

    /// Persist a version immediately. See [`Self::stage`].
    pub fn record_version(
        &self,
        key: &ResourceKey,
        version: u64,
        remote_version: Option<u64>,
        checksum: &str,
        at: DateTime<Utc>,
    ) -> Result<ResourceVersion> {
        let mut batch = WriteBatch::new();
        let record = self.stage(&mut batch, key, version, remote_version, checksum, at)?;
        self.store.commit(batch)?;
        Ok(record)
    }

    /// Stage a version record into `batch`.
    ///
    /// The stored version is `max(existing, version)` and a known remote
    /// version is never forgotten by a write that does not carry one.
    pub fn stage(
        &self,
        batch: &mut WriteBatch,
        key: &ResourceKey,
        version: u64,
        remote_version: Option<u64>,
        checksum: &str,
        at: DateTime<Utc>,
    ) -> Result<ResourceVersion> {
        let existing = self.current(key)?;
        let record = ResourceVersion {
            resource_type: key.resource_type.clone(),
            resource_id: key.id.clone(),
            version: existing
                .as_ref()
                .map_or(version, |record| record.version.max(version)),
            remote_version: remote_version
                .or_else(|| existing.as_ref().and_then(|record| record.remote_version)),
            last_modified: at,
            checksum: checksum.to_string(),
        };
        batch.put(Collection::Versions, key.storage_key(), &record)?;
        Ok(record)
    }

    /// Move a lineage record to a new key (server id adoption).
    pub fn stage_rekey(
        &self,
        batch: &mut WriteBatch,
        from: &ResourceKey,
        to: &ResourceKey,
    ) -> Result<Option<ResourceVersion>> {
        let Some(mut record) = self.current(from)? else {
            return Ok(None);
        };
        record.resource_type.clone_from(&to.resource_type);
        record.resource_id.clone_from(&to.id);
        batch.delete(Collection::Versions, from.storage_key());
        batch.put(Collection::Versions, to.storage_key(), &record)?;
        Ok(Some(record))
    }
}

/// True when both sides carry comparable metadata and it differs.
///
/// Versions are compared when both sides have one, otherwise timestamps.
/// Missing metadata on either side means "new to the client", never a
/// conflict. Symmetric by construction.
pub fn has_diverged(local: &VersionStamp, remote: &VersionStamp) -> bool {
    match (local.version, remote.version) {
        (Some(local_version), Some(remote_version)) => local_version != remote_version,
        _ => match (local.last_modified, remote.last_modified) {
            (Some(local_at), Some(remote_at)) => local_at != remote_at,
            _ => false,
        },
    }
}
