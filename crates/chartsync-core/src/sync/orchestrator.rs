//! Sync orchestrator
//!
//! One [`SyncPass`] pulls remote changes for the tracked resource types and
//! then pushes queued local changes batch by batch. Passes are serialized by
//! the engine; this module only knows how to run a single one.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cache::ResourceCache;
use super::conflicts::ConflictStore;
use super::errors::ErrorLog;
use super::events::{EventPublisher, SyncEvent};
use super::queue::{FailureOutcome, QueueFilter, QueueManager};
use super::resolver::{ConflictResolver, ResolveOutcome};
use super::versions::{has_diverged, VersionTracker};
use super::{checkpoint_key, LAST_SYNC_KEY};
use crate::clock::{Clock, IdGenerator};
use crate::config::SyncConfig;
use crate::db::{Collection, Store, StoreExt, WriteBatch};
use crate::error::{Error, Result};
use crate::models::{
    ConflictStrategy, Operation, Priority, Resolution, Resource, ResourceKey, SyncConflict,
    SyncErrorKind, SyncErrorRecord, SyncProgress, SyncQueueItem, VersionStamp,
};
use crate::remote::{RemoteApi, RemoteError, SearchParams};
use crate::util::is_temporary_id;

/// Author recorded on conflicts the engine settles on its own.
pub const ENGINE_RESOLVER: &str = "sync-engine";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
    #[default]
    Bidirectional,
}

impl SyncDirection {
    pub const fn includes_pull(self) -> bool {
        matches!(self, Self::Pull | Self::Bidirectional)
    }

    pub const fn includes_push(self) -> bool {
        matches!(self, Self::Push | Self::Bidirectional)
    }
}

pub type ProgressCallback = Arc<dyn Fn(&SyncProgress) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SyncErrorRecord) + Send + Sync>;

/// Per-pass options. Unset fields fall back to [`SyncConfig`].
#[derive(Clone, Default)]
pub struct SyncOptions {
    pub direction: SyncDirection,
    pub batch_size: Option<usize>,
    /// Strategy for items without their own override
    pub strategy: Option<ConflictStrategy>,
    /// Restrict pull and push to these resource types
    pub resource_types: Option<Vec<String>>,
    pub on_progress: Option<ProgressCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("direction", &self.direction)
            .field("batch_size", &self.batch_size)
            .field("strategy", &self.strategy)
            .field("resource_types", &self.resource_types)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl SyncOptions {
    pub fn push_only() -> Self {
        Self {
            direction: SyncDirection::Push,
            ..Self::default()
        }
    }

    pub fn pull_only() -> Self {
        Self {
            direction: SyncDirection::Pull,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    #[must_use]
    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    #[must_use]
    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }
}

/// Summary of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub direction: SyncDirection,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Remote resources written into the local cache
    pub pulled: usize,
    /// Queue items applied remotely
    pub pushed: usize,
    /// Items settled locally because the server copy won
    pub kept_remote: usize,
    /// Items rescheduled for a later attempt
    pub retried: usize,
    /// Items that became terminal failures
    pub failed: usize,
    /// Conflicts detected during the pass
    pub conflicts: usize,
    /// Items parked for manual resolution
    pub deferred: usize,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub const fn new(direction: SyncDirection, started_at: DateTime<Utc>) -> Self {
        Self {
            direction,
            started_at,
            finished_at: None,
            pulled: 0,
            pushed: 0,
            kept_remote: 0,
            retried: 0,
            failed: 0,
            conflicts: 0,
            deferred: 0,
            cancelled: false,
            errors: Vec::new(),
        }
    }
}

/// Everything a pass needs, owned by the engine.
pub struct SyncContext {
    pub store: Arc<dyn Store>,
    pub remote: Arc<dyn RemoteApi>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub config: SyncConfig,
    pub queue: QueueManager,
    pub versions: VersionTracker,
    pub cache: ResourceCache,
    pub conflicts: ConflictStore,
    pub errors: ErrorLog,
    pub resolver: ConflictResolver,
    pub events: EventPublisher,
}

impl SyncContext {
    pub fn new(
        store: Arc<dyn Store>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: SyncConfig,
        resolver: ConflictResolver,
    ) -> Self {
        Self {
            queue: QueueManager::new(store.clone(), &config, clock.clone(), ids.clone()),
            versions: VersionTracker::new(store.clone()),
            cache: ResourceCache::new(store.clone()),
            conflicts: ConflictStore::new(store.clone()),
            errors: ErrorLog::new(store.clone(), config.error_log_limit),
            store,
            remote,
            clock,
            ids,
            config,
            resolver,
            events: EventPublisher::new(),
        }
    }

    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.store.get_json(Collection::Metadata, LAST_SYNC_KEY)
    }
}

/// How one queue item ended in this pass.
enum ItemOutcome {
    Pushed,
    KeptRemote,
    Deferred,
    Failed(FailureOutcome),
}

pub struct SyncPass<'a> {
    ctx: &'a SyncContext,
    options: &'a SyncOptions,
    cancel: &'a AtomicBool,
    report: SyncReport,
    progress: SyncProgress,
    critical_failure: Option<Error>,
}

impl<'a> SyncPass<'a> {
    pub fn new(ctx: &'a SyncContext, options: &'a SyncOptions, cancel: &'a AtomicBool) -> Self {
        Self {
            report: SyncReport::new(options.direction, ctx.clock.now()),
            ctx,
            options,
            cancel,
            progress: SyncProgress::default(),
            critical_failure: None,
        }
    }

    /// Run the pass. Only store failures and a critical item running out of
    /// retries surface as errors; everything else lands in the report.
    pub async fn run(mut self) -> Result<SyncReport> {
        tracing::info!(direction = ?self.options.direction, "sync pass started");

        if self.options.direction.includes_pull() {
            self.pull().await?;
        }
        if self.options.direction.includes_push() && !self.report.cancelled {
            self.push().await?;
        }

        let finished_at = self.ctx.clock.now();
        let mut batch = WriteBatch::new();
        batch.put(Collection::Metadata, LAST_SYNC_KEY, &finished_at)?;
        self.ctx.store.commit(batch)?;
        self.report.finished_at = Some(finished_at);

        tracing::info!(
            pulled = self.report.pulled,
            pushed = self.report.pushed,
            kept_remote = self.report.kept_remote,
            retried = self.report.retried,
            failed = self.report.failed,
            conflicts = self.report.conflicts,
            deferred = self.report.deferred,
            cancelled = self.report.cancelled,
            "sync pass finished"
        );

        match self.critical_failure.take() {
            Some(error) => Err(error),
            None => Ok(self.report),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn pull_types(&self) -> Vec<String> {
        self.options
            .resource_types
            .clone()
            .unwrap_or_else(|| self.ctx.config.tracked_resource_types.clone())
    }

    async fn pull(&mut self) -> Result<()> {
        for resource_type in self.pull_types() {
            if self.is_cancelled() {
                self.report.cancelled = true;
                return Ok(());
            }

            let key = checkpoint_key(&resource_type);
            let since: Option<DateTime<Utc>> =
                self.ctx.store.get_json(Collection::Metadata, &key)?;
            let params = SearchParams::modified_since(since);

            let resources = match self.ctx.remote.search(&resource_type, &params).await {
                Ok(resources) => resources,
                Err(error) => {
                    tracing::warn!(resource_type, error = %error, "pull failed, checkpoint kept");
                    self.record_pull_error(&resource_type, &error)?;
                    continue;
                }
            };

            let mut newest = since;
            let fetched = resources.len();
            for remote in resources {
                newest = newest.max(remote.last_modified());
                self.apply_pulled(remote)?;
            }

            if newest != since {
                let mut batch = WriteBatch::new();
                batch.put(Collection::Metadata, key, &newest)?;
                self.ctx.store.commit(batch)?;
            }
            tracing::debug!(resource_type, fetched, "pulled resource type");
        }
        Ok(())
    }

    fn record_pull_error(&mut self, resource_type: &str, error: &RemoteError) -> Result<()> {
        let record = SyncErrorRecord {
            id: self.ctx.ids.next_id(),
            item_id: None,
            resource_type: resource_type.to_string(),
            resource_id: None,
            operation: None,
            kind: SyncErrorKind::Pull,
            message: error.to_string(),
            terminal: false,
            occurred_at: self.ctx.clock.now(),
        };
        self.ctx.errors.append(record.clone())?;
        self.report
            .errors
            .push(format!("pull {resource_type}: {error}"));
        self.notify_error(&record);
        Ok(())
    }

    /// Fast-forward clean copies; record a conflict when a copy with unpushed
    /// changes was based on an older server version.
    fn apply_pulled(&mut self, remote: Resource) -> Result<()> {
        let key = remote.key();
        let now = self.ctx.clock.now();
        let pending: Vec<SyncQueueItem> = self
            .ctx
            .queue
            .list_active()?
            .into_iter()
            .filter(|item| item.key() == key)
            .collect();

        let Some(head) = pending.first() else {
            if self.ctx.cache.get(&key)?.as_ref() == Some(&remote) {
                return Ok(());
            }
            let mut batch = WriteBatch::new();
            self.ctx.cache.stage_put(&mut batch, &remote)?;
            let version = self
                .ctx
                .versions
                .current(&key)?
                .map_or(1, |record| record.version);
            self.ctx.versions.stage(
                &mut batch,
                &key,
                version,
                remote.version(),
                &remote.checksum(),
                now,
            )?;
            self.ctx.store.commit(batch)?;
            self.report.pulled += 1;
            return Ok(());
        };

        if !has_diverged(
            &VersionStamp::base(head.remote_version),
            &VersionStamp::of(&remote),
        ) {
            return Ok(());
        }

        let local = self
            .ctx
            .cache
            .get(&key)?
            .or_else(|| head.payload.clone())
            .unwrap_or_else(|| remote.clone());

        let mut batch = WriteBatch::new();
        let detected = match self.ctx.conflicts.find_open(&key)? {
            Some(mut open) => {
                open.remote_version = remote.version();
                open.remote_resource = remote;
                self.ctx.conflicts.stage_put(&mut batch, &open)?;
                None
            }
            None => {
                let conflict = SyncConflict {
                    id: self.ctx.ids.next_id(),
                    resource_type: key.resource_type.clone(),
                    resource_id: key.id.clone(),
                    local_resource: local,
                    remote_version: remote.version(),
                    remote_resource: remote,
                    local_version: Some(head.local_version),
                    detected_at: now,
                    resolution: None,
                    resolved_at: None,
                    resolved_by: None,
                };
                self.ctx.conflicts.stage_put(&mut batch, &conflict)?;
                Some(conflict)
            }
        };
        self.ctx.store.commit(batch)?;

        if let Some(conflict) = detected {
            tracing::info!(conflict_id = %conflict.id, resource = %key, "conflict detected on pull");
            self.report.conflicts += 1;
            self.ctx
                .events
                .publish(&SyncEvent::ConflictDetected(conflict));
        }
        Ok(())
    }

    async fn push(&mut self) -> Result<()> {
        let batch_size = self
            .options
            .batch_size
            .unwrap_or(self.ctx.config.batch_size)
            .max(1);
        let mut filter = QueueFilter {
            resource_types: self
                .options
                .resource_types
                .as_ref()
                .map(|types| types.iter().cloned().collect::<HashSet<_>>()),
            exclude: HashSet::new(),
        };

        let counts = self.ctx.queue.counts()?;
        self.progress.total = counts.active.saturating_sub(counts.awaiting_resolution);
        self.emit_progress();

        loop {
            if self.is_cancelled() {
                self.report.cancelled = true;
                break;
            }
            let batch = self.ctx.queue.dequeue_batch(batch_size, &filter)?;
            if batch.is_empty() {
                break;
            }

            let mut remaining = batch.into_iter();
            while let Some(item) = remaining.next() {
                if self.is_cancelled() {
                    let unprocessed: Vec<SyncQueueItem> =
                        std::iter::once(item).chain(remaining).collect();
                    self.ctx.queue.release(&unprocessed)?;
                    self.report.cancelled = true;
                    tracing::info!(released = unprocessed.len(), "sync pass cancelled");
                    return Ok(());
                }

                filter.exclude.insert(item.id.clone());
                self.progress.in_progress = 1;
                self.progress.current_resource = Some(item.key().to_string());
                self.emit_progress();

                let outcome = self.push_item(item).await?;
                self.progress.in_progress = 0;
                match outcome {
                    ItemOutcome::Pushed => {
                        self.report.pushed += 1;
                        self.progress.completed += 1;
                    }
                    ItemOutcome::KeptRemote => {
                        self.report.kept_remote += 1;
                        self.progress.completed += 1;
                    }
                    ItemOutcome::Deferred => {
                        self.report.deferred += 1;
                        self.progress.failed += 1;
                    }
                    ItemOutcome::Failed(FailureOutcome::Rescheduled { .. }) => {
                        self.report.retried += 1;
                        self.progress.failed += 1;
                    }
                    ItemOutcome::Failed(FailureOutcome::Exhausted) => {
                        self.report.failed += 1;
                        self.progress.failed += 1;
                    }
                }
                self.emit_progress();
            }
        }

        self.progress.current_resource = None;
        Ok(())
    }

    fn emit_progress(&mut self) {
        self.progress.total = self
            .progress
            .total
            .max(self.progress.completed + self.progress.failed);
        self.progress.recompute();
        if let Some(callback) = &self.options.on_progress {
            callback(&self.progress);
        }
        self.ctx
            .events
            .publish(&SyncEvent::SyncProgress(self.progress.clone()));
    }

    fn notify_error(&self, record: &SyncErrorRecord) {
        if let Some(callback) = &self.options.on_error {
            callback(record);
        }
    }

    async fn push_item(&mut self, item: SyncQueueItem) -> Result<ItemOutcome> {
        tracing::debug!(
            item_id = %item.id,
            resource = %item.key(),
            operation = %item.operation,
            attempt = item.attempts + 1,
            "pushing queue item"
        );
        if item.operation != Operation::Delete && item.payload.is_none() {
            let error = RemoteError::Invalid("queue item has no payload".to_string());
            return self.fail(item, &error);
        }
        match item.operation {
            Operation::Create => self.push_create(item).await,
            Operation::Update => self.push_update(item).await,
            Operation::Delete => self.push_delete(item).await,
        }
    }

    async fn push_create(&mut self, item: SyncQueueItem) -> Result<ItemOutcome> {
        let mut outgoing = item
            .payload
            .clone()
            .unwrap_or_else(|| Resource::new(&item.resource_type, &item.resource_id));
        if is_temporary_id(&outgoing.id) {
            outgoing.id.clear();
        }
        outgoing.meta.version_id = None;

        match self.ctx.remote.create(&outgoing).await {
            Ok(created) => {
                let mut batch = WriteBatch::new();
                self.ctx.queue.stage_completion(&mut batch, &item);
                self.stage_confirmed(&mut batch, &item, &created)?;
                self.ctx.store.commit(batch)?;
                tracing::debug!(item_id = %item.id, resource = %created.key(), "created remotely");
                Ok(ItemOutcome::Pushed)
            }
            Err(error) => self.fail(item, &error),
        }
    }

    async fn push_update(&mut self, item: SyncQueueItem) -> Result<ItemOutcome> {
        let payload = item
            .payload
            .clone()
            .unwrap_or_else(|| Resource::new(&item.resource_type, &item.resource_id));

        let remote = match self
            .ctx
            .remote
            .read(&item.resource_type, &item.resource_id)
            .await
        {
            Ok(remote) => remote,
            Err(error) if error.is_not_found() => {
                tracing::debug!(resource = %item.key(), "update target missing remotely, creating");
                return self.push_create(item).await;
            }
            Err(error) => return self.fail(item, &error),
        };

        if !has_diverged(
            &VersionStamp::base(item.remote_version),
            &VersionStamp::of(&remote),
        ) {
            let mut outgoing = payload;
            outgoing.meta.version_id = item.remote_version.or_else(|| remote.version());
            return self.send_update(item, outgoing).await;
        }

        self.resolve_divergence(item, payload, remote).await
    }

    async fn send_update(
        &mut self,
        item: SyncQueueItem,
        outgoing: Resource,
    ) -> Result<ItemOutcome> {
        match self.ctx.remote.update(&outgoing).await {
            Ok(updated) => {
                let mut batch = WriteBatch::new();
                self.ctx.queue.stage_completion(&mut batch, &item);
                self.stage_confirmed(&mut batch, &item, &updated)?;
                self.ctx.store.commit(batch)?;
                Ok(ItemOutcome::Pushed)
            }
            Err(error) if error.is_not_found() => self.push_create(item).await,
            Err(error) => self.fail(item, &error),
        }
    }

    async fn resolve_divergence(
        &mut self,
        mut item: SyncQueueItem,
        local: Resource,
        remote: Resource,
    ) -> Result<ItemOutcome> {
        let key = item.key();
        let now = self.ctx.clock.now();
        let strategy = item
            .conflict_resolution_override
            .or(self.options.strategy)
            .unwrap_or(self.ctx.config.default_strategy);

        let (mut conflict, is_new) = match self.ctx.conflicts.find_open(&key)? {
            Some(mut open) => {
                open.remote_version = remote.version();
                open.remote_resource = remote.clone();
                (open, false)
            }
            None => (
                SyncConflict {
                    id: self.ctx.ids.next_id(),
                    resource_type: key.resource_type.clone(),
                    resource_id: key.id.clone(),
                    local_resource: local.clone(),
                    remote_resource: remote.clone(),
                    local_version: Some(item.local_version),
                    remote_version: remote.version(),
                    detected_at: now,
                    resolution: None,
                    resolved_at: None,
                    resolved_by: None,
                },
                true,
            ),
        };
        if is_new {
            self.report.conflicts += 1;
        }
        tracing::info!(
            conflict_id = %conflict.id,
            resource = %key,
            strategy = %strategy,
            base_version = ?item.remote_version,
            remote_version = ?remote.version(),
            "conflict detected on push"
        );

        let resolution = match self.ctx.resolver.resolve(&local, &remote, strategy, now) {
            ResolveOutcome::Resolved(resolution) => resolution,
            ResolveOutcome::Manual => {
                let mut batch = WriteBatch::new();
                self.ctx.conflicts.stage_put(&mut batch, &conflict)?;
                let record =
                    self.ctx
                        .queue
                        .stage_awaiting_resolution(&mut batch, &mut item, &conflict.id)?;
                self.ctx.store.commit(batch)?;

                if is_new {
                    self.ctx
                        .events
                        .publish(&SyncEvent::ConflictDetected(conflict));
                }
                self.report
                    .errors
                    .push(format!("{key}: manual resolution required"));
                self.notify_error(&record);
                return Ok(ItemOutcome::Deferred);
            }
        };

        if resolution.keeps_remote(&remote) {
            conflict.resolve(resolution, ENGINE_RESOLVER, now);
            let mut batch = WriteBatch::new();
            self.ctx.queue.stage_completion(&mut batch, &item);
            self.ctx.conflicts.stage_put(&mut batch, &conflict)?;
            self.stage_kept_remote(&mut batch, &item, &remote)?;
            self.ctx.store.commit(batch)?;
            self.publish_conflict(conflict, is_new);
            return Ok(ItemOutcome::KeptRemote);
        }

        let mut outgoing = resolution.final_resource().clone();
        outgoing.resource_type.clone_from(&key.resource_type);
        outgoing.id.clone_from(&key.id);
        outgoing.meta.version_id = remote.version();

        match self.ctx.remote.update(&outgoing).await {
            Ok(updated) => {
                conflict.resolve(resolution, ENGINE_RESOLVER, now);
                let mut batch = WriteBatch::new();
                self.ctx.queue.stage_completion(&mut batch, &item);
                self.ctx.conflicts.stage_put(&mut batch, &conflict)?;
                self.stage_confirmed(&mut batch, &item, &updated)?;
                self.ctx.store.commit(batch)?;
                self.publish_conflict(conflict, is_new);
                Ok(ItemOutcome::Pushed)
            }
            Err(error) => {
                // The decision never reached the server. The conflict stays
                // open and the item keeps its base, so a retry decides again
                // against whatever the server holds then.
                let mut batch = WriteBatch::new();
                self.ctx.conflicts.stage_put(&mut batch, &conflict)?;
                self.ctx.store.commit(batch)?;
                if is_new {
                    self.ctx
                        .events
                        .publish(&SyncEvent::ConflictDetected(conflict));
                }
                self.fail(item, &error)
            }
        }
    }

    fn publish_conflict(&self, conflict: SyncConflict, is_new: bool) {
        if is_new {
            self.ctx
                .events
                .publish(&SyncEvent::ConflictDetected(conflict.clone()));
        }
        self.ctx
            .events
            .publish(&SyncEvent::ConflictResolved(conflict));
    }

    async fn push_delete(&mut self, item: SyncQueueItem) -> Result<ItemOutcome> {
        match self
            .ctx
            .remote
            .delete(&item.resource_type, &item.resource_id)
            .await
        {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {
                tracing::debug!(resource = %item.key(), "already absent remotely");
            }
            Err(error) => return self.fail(item, &error),
        }

        let key = item.key();
        let mut batch = WriteBatch::new();
        self.ctx.queue.stage_completion(&mut batch, &item);
        // A divergence seen on pull is moot once the resource is gone.
        let settled = match self.ctx.conflicts.find_open(&key)? {
            Some(mut conflict) => {
                let resolution =
                    Resolution::local_wins(&conflict.local_resource, "deleted locally");
                conflict.resolve(resolution, ENGINE_RESOLVER, self.ctx.clock.now());
                self.ctx.conflicts.stage_put(&mut batch, &conflict)?;
                Some(conflict)
            }
            None => None,
        };
        self.ctx.store.commit(batch)?;

        if let Some(conflict) = settled {
            tracing::info!(conflict_id = %conflict.id, resource = %key, "conflict closed by delete");
            self.ctx
                .events
                .publish(&SyncEvent::ConflictResolved(conflict));
        }
        Ok(ItemOutcome::Pushed)
    }

    /// Stage the effects of a write the server accepted: cache, version
    /// lineage, server id adoption and rebasing of later items.
    fn stage_confirmed(
        &self,
        batch: &mut WriteBatch,
        item: &SyncQueueItem,
        confirmed: &Resource,
    ) -> Result<()> {
        let now = self.ctx.clock.now();
        let old_key = item.key();
        let new_key = confirmed.key();

        let later =
            self.ctx
                .queue
                .stage_rebase(batch, &old_key, &new_key, confirmed.version(), &item.id)?;

        // Later local edits stay visible; only the envelope follows the server.
        let cached = if later > 0 {
            self.ctx
                .cache
                .get(&old_key)?
                .map_or_else(
                    || confirmed.clone(),
                    |mut cached| {
                        cached.id.clone_from(&new_key.id);
                        cached.meta.version_id = confirmed.version();
                        cached
                    },
                )
        } else {
            confirmed.clone()
        };

        let version = self
            .ctx
            .versions
            .current(&old_key)?
            .map_or(item.local_version, |record| {
                record.version.max(item.local_version)
            });

        if old_key != new_key {
            self.ctx.cache.stage_remove(batch, &old_key);
            self.ctx.versions.stage_rekey(batch, &old_key, &new_key)?;
            self.ctx.conflicts.stage_rekey(batch, &old_key, &new_key)?;
            tracing::debug!(from = %old_key, to = %new_key, "adopted server id");
        }
        self.ctx.cache.stage_put(batch, &cached)?;
        self.ctx.versions.stage(
            batch,
            &new_key,
            version,
            confirmed.version(),
            &cached.checksum(),
            now,
        )?;
        Ok(())
    }

    /// Stage local adoption of the server copy when a resolution kept it.
    fn stage_kept_remote(
        &self,
        batch: &mut WriteBatch,
        item: &SyncQueueItem,
        remote: &Resource,
    ) -> Result<()> {
        let key = item.key();
        // Later changes were queued on top of the local copy the server
        // turned down, so they now build on the server's version.
        let later_pending =
            self.ctx
                .queue
                .stage_rebase(batch, &key, &key, remote.version(), &item.id)?;
        if later_pending == 0 {
            self.ctx.cache.stage_put(batch, remote)?;
        }
        let version = self
            .ctx
            .versions
            .current(&key)?
            .map_or(item.local_version, |record| {
                record.version.max(item.local_version)
            });
        self.ctx.versions.stage(
            batch,
            &key,
            version,
            remote.version(),
            &remote.checksum(),
            self.ctx.clock.now(),
        )?;
        Ok(())
    }

    fn fail(&mut self, mut item: SyncQueueItem, error: &RemoteError) -> Result<ItemOutcome> {
        let (outcome, record) = self.ctx.queue.mark_failed(&mut item, error)?;
        self.report
            .errors
            .push(format!("{}: {error}", item.key()));
        self.notify_error(&record);

        if outcome == FailureOutcome::Exhausted
            && item.priority == Priority::Critical
            && self.critical_failure.is_none()
        {
            self.critical_failure = Some(Error::CriticalItemFailed {
                item_id: item.id.clone(),
                resource: ResourceKey::new(item.resource_type.clone(), item.resource_id.clone())
                    .to_string(),
                message: error.to_string(),
            });
        }
        Ok(ItemOutcome::Failed(outcome))
    }
}
