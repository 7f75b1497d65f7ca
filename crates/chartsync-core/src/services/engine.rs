//! Offline-first sync engine service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::config::SyncConfig;
use crate::db::{Collection, Store, WriteBatch};
use crate::error::{Error, Result};
use crate::export::SyncDataExport;
use crate::models::{
    ConflictStrategy, Operation, QueueItemStatus, Resolution, Resource, ResourceKey,
    SyncConflict, SyncProgress, SyncQueueItem, SyncStatus,
};
use crate::remote::RemoteApi;
use crate::state::SyncState;
use crate::sync::{
    ConflictResolver, CustomResolver, EnqueueOptions, EventHandler, LifecycleTransition,
    MergeFn, NetworkMonitor, ScheduledTask, Scheduler, SubscriptionId, SyncContext, SyncEvent,
    SyncEventKind, SyncOptions, SyncPass, SyncReport,
};

/// Author recorded when a caller resolves a conflict without naming one.
pub const DEFAULT_RESOLVER: &str = "user";

/// What [`SyncEngine::cleanup`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub conflicts_removed: usize,
    pub errors_removed: usize,
}

type PassOutcome = std::result::Result<SyncReport, String>;

struct EngineInner {
    ctx: SyncContext,
    monitor: NetworkMonitor,
    scheduler: Mutex<Scheduler>,
    /// Held for the whole of a pass and by operations that must not overlap one
    sync_lock: tokio::sync::Mutex<()>,
    syncing: AtomicBool,
    cancel: AtomicBool,
    state: Mutex<SyncState>,
    progress: Arc<Mutex<Option<SyncProgress>>>,
    last_outcome: Mutex<Option<PassOutcome>>,
    status: RwLock<SyncStatus>,
}

/// Thread-safe handle to the sync engine. Clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("online", &self.inner.monitor.is_online())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    store: Arc<dyn Store>,
    remote: Arc<dyn RemoteApi>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    resolver: ConflictResolver,
    online: bool,
    foreground: bool,
}

impl SyncEngineBuilder {
    pub fn new(store: Arc<dyn Store>, remote: Arc<dyn RemoteApi>) -> Self {
        Self {
            store,
            remote,
            config: SyncConfig::default(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
            resolver: ConflictResolver::new(),
            online: false,
            foreground: true,
        }
    }

    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Callback used by the `custom` strategy.
    #[must_use]
    pub fn custom_resolver(mut self, resolver: CustomResolver) -> Self {
        self.resolver = self.resolver.with_custom(resolver);
        self
    }

    /// Replace the default merge for one resource type.
    #[must_use]
    pub fn merge_strategy(mut self, resource_type: impl Into<String>, merge: MergeFn) -> Self {
        self.resolver = self.resolver.with_merge(resource_type, merge);
        self
    }

    /// Initial connectivity. Engines start offline unless told otherwise.
    #[must_use]
    pub const fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    #[must_use]
    pub const fn foreground(mut self, foreground: bool) -> Self {
        self.foreground = foreground;
        self
    }

    pub fn build(self) -> Result<SyncEngine> {
        self.config.validate()?;
        let monitor = NetworkMonitor::new(
            self.online,
            self.foreground,
            self.config.sync_in_background,
        );
        let first_periodic = self.clock.now() + self.config.sync_interval();
        let ctx = SyncContext::new(
            self.store,
            self.remote,
            self.clock,
            self.ids,
            self.config,
            self.resolver,
        );

        let recovered = ctx.queue.recover_in_flight()?;
        if recovered > 0 {
            tracing::warn!(recovered, "queue items were in flight at startup");
        }

        let mut scheduler = Scheduler::new();
        scheduler.schedule(first_periodic, ScheduledTask::PeriodicSync);

        let engine = SyncEngine {
            inner: Arc::new(EngineInner {
                ctx,
                monitor,
                scheduler: Mutex::new(scheduler),
                sync_lock: tokio::sync::Mutex::new(()),
                syncing: AtomicBool::new(false),
                cancel: AtomicBool::new(false),
                state: Mutex::new(SyncState::Idle),
                progress: Arc::new(Mutex::new(None)),
                last_outcome: Mutex::new(None),
                status: RwLock::new(SyncStatus::default()),
            }),
        };
        engine.schedule_retry_wakeup()?;
        engine.refresh_status()?;
        tracing::info!(online = engine.inner.monitor.is_online(), "sync engine ready");
        Ok(engine)
    }
}

impl SyncEngine {
    pub fn builder(store: Arc<dyn Store>, remote: Arc<dyn RemoteApi>) -> SyncEngineBuilder {
        SyncEngineBuilder::new(store, remote)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.ctx.config
    }

    pub fn state(&self) -> SyncState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    pub fn is_online(&self) -> bool {
        self.inner.monitor.is_online()
    }

    // --- local changes ---

    /// Queue a local mutation. High and critical changes start a pass right
    /// away when the engine may sync and no pass is running.
    pub async fn queue_operation(
        &self,
        operation: Operation,
        resource: Resource,
        options: &EnqueueOptions,
    ) -> Result<SyncQueueItem> {
        let item = self.inner.ctx.queue.enqueue(operation, resource, options)?;
        self.refresh_status()?;

        if item.priority.is_urgent() && self.inner.monitor.should_sync() && !self.is_syncing() {
            tracing::debug!(item_id = %item.id, priority = %item.priority, "urgent change, syncing now");
            if let Err(error) = self.sync(SyncOptions::default()).await {
                tracing::warn!(error = %error, "immediate sync after urgent change failed");
            }
        }
        Ok(item)
    }

    /// Latest local representation, including unconfirmed changes.
    pub fn get_resource(&self, resource_type: &str, id: &str) -> Result<Option<Resource>> {
        self.inner
            .ctx
            .cache
            .get(&ResourceKey::new(resource_type, id))
    }

    /// Items still owed to the server, in enqueue order.
    pub fn pending_operations(&self) -> Result<Vec<SyncQueueItem>> {
        self.inner.ctx.queue.list_active()
    }

    /// Terminal failures waiting for [`retry_failed`](Self::retry_failed)
    /// or [`discard_failed`](Self::discard_failed).
    pub fn failed_operations(&self) -> Result<Vec<SyncQueueItem>> {
        self.inner.ctx.queue.list_failed()
    }

    pub fn retry_failed(&self, item_id: &str) -> Result<SyncQueueItem> {
        let item = self.inner.ctx.queue.requeue_failed(item_id)?;
        self.refresh_status()?;
        Ok(item)
    }

    pub fn discard_failed(&self, item_id: &str) -> Result<SyncQueueItem> {
        let item = self.inner.ctx.queue.discard(item_id)?;
        self.refresh_status()?;
        Ok(item)
    }

    // --- sync passes ---

    /// Run one pass. A caller arriving while a pass runs waits for it and
    /// receives its outcome instead of starting another.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport> {
        if !self.inner.monitor.is_online() {
            tracing::debug!("sync requested while offline");
            return Err(Error::Offline);
        }

        let guard = match self.inner.sync_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) if self.is_syncing() => return self.join_in_flight().await,
            Err(_) => self.inner.sync_lock.lock().await,
        };
        let result = self.run_pass(&options).await;
        drop(guard);
        result
    }

    async fn join_in_flight(&self) -> Result<SyncReport> {
        tracing::debug!("joining in-flight sync pass");
        let _guard = self.inner.sync_lock.lock().await;
        let outcome = self
            .inner
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match outcome {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(Error::JoinedSyncFailed(message)),
            None => Err(Error::JoinedSyncFailed(
                "pass finished without an outcome".to_string(),
            )),
        }
    }

    async fn run_pass(&self, options: &SyncOptions) -> Result<SyncReport> {
        let inner = &self.inner;
        inner.cancel.store(false, Ordering::SeqCst);
        inner.syncing.store(true, Ordering::SeqCst);
        self.set_state(SyncState::Syncing);
        inner.ctx.events.publish(&SyncEvent::SyncStarted);
        self.refresh_status_logged();

        let result = self.execute_pass(options).await;

        inner.syncing.store(false, Ordering::SeqCst);
        self.set_state(SyncState::after_pass(result.is_ok()));
        *inner
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        *inner
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(match &result {
            Ok(report) => Ok(report.clone()),
            Err(error) => Err(error.to_string()),
        });
        if let Err(error) = self.schedule_retry_wakeup() {
            tracing::warn!(error = %error, "failed to schedule retry wake-up");
        }

        match &result {
            Ok(report) => inner
                .ctx
                .events
                .publish(&SyncEvent::SyncCompleted(report.clone())),
            Err(error) => {
                tracing::error!(error = %error, "sync pass failed");
                inner.ctx.events.publish(&SyncEvent::SyncFailed {
                    message: error.to_string(),
                });
            }
        }
        self.refresh_status_logged();
        result
    }

    async fn execute_pass(&self, options: &SyncOptions) -> Result<SyncReport> {
        let ctx = &self.inner.ctx;
        ctx.queue.recover_in_flight()?;

        let progress = self.inner.progress.clone();
        let caller = options.on_progress.clone();
        let mut options = options.clone();
        options.on_progress = Some(Arc::new(move |update: &SyncProgress| {
            *progress.lock().unwrap_or_else(PoisonError::into_inner) = Some(update.clone());
            if let Some(callback) = &caller {
                callback(update);
            }
        }));

        SyncPass::new(ctx, &options, &self.inner.cancel).run().await
    }

    /// Ask the running pass to stop after its current item. Returns false
    /// when no pass is running.
    pub fn cancel_sync(&self) -> bool {
        if !self.is_syncing() {
            return false;
        }
        tracing::info!("sync cancellation requested");
        self.inner.cancel.store(true, Ordering::SeqCst);
        true
    }

    // --- status ---

    /// Point-in-time status snapshot.
    pub fn get_sync_status(&self) -> SyncStatus {
        self.inner
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recompute the snapshot from the store and publish it.
    pub fn refresh_status(&self) -> Result<SyncStatus> {
        let ctx = &self.inner.ctx;
        let counts = ctx.queue.counts()?;
        let status = SyncStatus {
            is_online: self.inner.monitor.is_online(),
            is_syncing: self.is_syncing(),
            last_sync_at: ctx.last_sync_at()?,
            pending_changes: counts.active,
            failed_changes: counts.failed,
            conflicted_changes: ctx.conflicts.count_unresolved()?,
            errors: ctx.errors.entries()?,
            sync_progress: self
                .inner
                .progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };
        *self
            .inner
            .status
            .write()
            .unwrap_or_else(PoisonError::into_inner) = status.clone();
        ctx.events.publish(&SyncEvent::StatusUpdated(status.clone()));
        Ok(status)
    }

    fn refresh_status_logged(&self) {
        if let Err(error) = self.refresh_status() {
            tracing::warn!(error = %error, "failed to refresh sync status");
        }
    }

    fn set_state(&self, state: SyncState) {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    // --- conflicts ---

    pub fn get_conflicts(&self, resolved: bool) -> Result<Vec<SyncConflict>> {
        self.inner.ctx.conflicts.list(resolved)
    }

    /// Apply a caller's decision to an open conflict.
    ///
    /// Keeping the server copy settles the blocked change locally. Any other
    /// outcome is re-queued on top of the remote version and pushed by the
    /// next pass. Waits for a running pass to finish first.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: Resolution,
        resolved_by: Option<&str>,
    ) -> Result<SyncConflict> {
        if resolution.strategy == ConflictStrategy::Manual {
            return Err(Error::InvalidInput(
                "a resolution must settle the conflict, not defer it again".to_string(),
            ));
        }

        let _guard = self.inner.sync_lock.lock().await;
        let ctx = &self.inner.ctx;
        let mut conflict = ctx
            .conflicts
            .get(conflict_id)?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if conflict.is_resolved() {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        let now = ctx.clock.now();
        let key = conflict.key();
        let remote = conflict.remote_resource.clone();
        let keeps_remote = resolution.keeps_remote(&remote);
        let mut decided = resolution.final_resource().clone();
        decided.resource_type.clone_from(&key.resource_type);
        decided.id.clone_from(&key.id);
        decided.meta.version_id = conflict.remote_version;
        decided.meta.last_updated = Some(now);
        conflict.resolve(resolution, resolved_by.unwrap_or(DEFAULT_RESOLVER), now);

        let items: Vec<SyncQueueItem> = ctx
            .queue
            .list_active()?
            .into_iter()
            .filter(|item| item.key() == key)
            .collect();
        if items.is_empty() {
            let last_queued = ctx
                .queue
                .all()?
                .into_iter()
                .filter(|item| item.key() == key)
                .max_by_key(|item| item.sequence);
            if last_queued.is_some_and(|item| item.operation == Operation::Delete) {
                return Err(Error::InvalidInput(format!(
                    "{key} was deleted locally; retry or discard the failed delete instead"
                )));
            }
        }
        // The change the conflict blocks: the parked item, else the oldest.
        let target = items
            .iter()
            .position(|item| item.conflict_id.as_deref() == Some(conflict_id))
            .unwrap_or(0);

        let mut batch = WriteBatch::new();
        ctx.conflicts.stage_put(&mut batch, &conflict)?;
        let mut enqueue_decision = false;
        let cached;

        if keeps_remote {
            for (index, mut item) in items.iter().cloned().enumerate() {
                if index == target {
                    ctx.queue.stage_completion(&mut batch, &item);
                    continue;
                }
                rebase_item(&mut item, conflict.remote_version, conflict_id);
                ctx.queue.stage_put(&mut batch, &item)?;
            }
            cached = if items.len() <= 1 {
                Some(remote.clone())
            } else {
                None
            };
        } else if items.is_empty() {
            enqueue_decision = true;
            cached = None;
        } else {
            for (index, mut item) in items.iter().cloned().enumerate() {
                rebase_item(&mut item, conflict.remote_version, conflict_id);
                if index == target && item.operation != Operation::Delete {
                    item.operation = Operation::Update;
                    item.payload = Some(decided.clone());
                }
                ctx.queue.stage_put(&mut batch, &item)?;
            }
            let decides_last = target + 1 == items.len();
            cached = (decides_last && items[target].operation != Operation::Delete)
                .then(|| decided.clone());
        }

        if let Some(resource) = &cached {
            ctx.cache.stage_put(&mut batch, resource)?;
            let version = ctx.versions.current(&key)?.map_or(1, |record| record.version);
            ctx.versions.stage(
                &mut batch,
                &key,
                version,
                conflict.remote_version,
                &resource.checksum(),
                now,
            )?;
        }
        ctx.store.commit(batch)?;

        if enqueue_decision {
            let options = EnqueueOptions {
                remote_version: conflict.remote_version,
                ..EnqueueOptions::default()
            };
            ctx.queue.enqueue(Operation::Update, decided, &options)?;
        }

        tracing::info!(
            conflict_id,
            resource = %key,
            kept_remote = keeps_remote,
            "conflict resolved"
        );
        ctx.events
            .publish(&SyncEvent::ConflictResolved(conflict.clone()));
        self.refresh_status()?;
        Ok(conflict)
    }

    // --- local data management ---

    /// Wipe every collection. Refused while a pass runs.
    pub fn clear_local_data(&self) -> Result<()> {
        let _guard = self
            .inner
            .sync_lock
            .try_lock()
            .map_err(|_| Error::SyncInProgress)?;
        for collection in Collection::ALL {
            self.inner.ctx.store.clear(collection)?;
        }
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.schedule_periodic(self.inner.ctx.clock.now());
        *self
            .inner
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!("local sync data cleared");
        self.refresh_status()?;
        Ok(())
    }

    pub fn export_sync_data(&self) -> Result<SyncDataExport> {
        let ctx = &self.inner.ctx;
        SyncDataExport::capture(ctx.store.as_ref(), ctx.clock.now())
    }

    /// Replace all local state with an export. Refused while a pass runs.
    pub fn import_sync_data(&self, data: &SyncDataExport) -> Result<()> {
        let _guard = self
            .inner
            .sync_lock
            .try_lock()
            .map_err(|_| Error::SyncInProgress)?;
        let ctx = &self.inner.ctx;
        let batch = data.restore_batch(ctx.store.as_ref())?;
        ctx.store.commit(batch)?;
        ctx.queue.recover_in_flight()?;
        self.schedule_retry_wakeup()?;
        tracing::info!(
            queue = data.queue.len(),
            resources = data.resources.len(),
            conflicts = data.conflicts.len(),
            "imported sync data"
        );
        self.refresh_status()?;
        Ok(())
    }

    /// Drop resolved conflicts and error records older than `days_to_keep`.
    pub fn cleanup(&self, days_to_keep: u32) -> Result<CleanupReport> {
        let ctx = &self.inner.ctx;
        let cutoff = ctx.clock.now() - Duration::days(i64::from(days_to_keep));
        let report = CleanupReport {
            conflicts_removed: ctx.conflicts.purge_resolved_before(cutoff)?,
            errors_removed: ctx.errors.purge_older_than(cutoff)?,
        };
        tracing::info!(
            days_to_keep,
            conflicts_removed = report.conflicts_removed,
            errors_removed = report.errors_removed,
            "cleanup finished"
        );
        self.refresh_status()?;
        Ok(report)
    }

    // --- events ---

    pub fn on(&self, kind: SyncEventKind, handler: EventHandler) -> SubscriptionId {
        self.inner.ctx.events.on(kind, handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.ctx.events.off(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.ctx.events.subscribe()
    }

    pub fn watch_online(&self) -> watch::Receiver<bool> {
        self.inner.monitor.watch_online()
    }

    // --- connectivity and lifecycle ---

    /// Feed a connectivity change. Coming online starts a pass; going
    /// offline cancels the running one.
    pub async fn set_online(&self, online: bool) -> Result<Option<SyncReport>> {
        let transition = self.inner.monitor.set_online(online);
        if transition == LifecycleTransition::Unchanged {
            return Ok(None);
        }
        self.inner
            .ctx
            .events
            .publish(&SyncEvent::NetworkStatusChanged { online });
        self.refresh_status()?;
        self.react(transition).await
    }

    /// Feed an app lifecycle change.
    pub async fn set_foreground(&self, foreground: bool) -> Result<Option<SyncReport>> {
        let transition = self.inner.monitor.set_foreground(foreground);
        self.react(transition).await
    }

    async fn react(&self, transition: LifecycleTransition) -> Result<Option<SyncReport>> {
        match transition {
            LifecycleTransition::CameOnline | LifecycleTransition::Foregrounded
                if self.inner.monitor.should_sync() =>
            {
                self.sync(SyncOptions::default()).await.map(Some)
            }
            LifecycleTransition::WentOffline => {
                self.cancel_sync();
                Ok(None)
            }
            LifecycleTransition::Backgrounded if !self.inner.monitor.should_sync() => {
                self.cancel_sync();
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    // --- scheduling ---

    /// Earliest scheduled periodic pass or retry wake-up.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_due()
    }

    /// Run scheduled work that is due at the engine clock's current time.
    /// Returns the report when a pass ran.
    pub async fn tick(&self) -> Result<Option<SyncReport>> {
        let now = self.inner.ctx.clock.now();
        let due = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take_due(now);
        if due.contains(&ScheduledTask::PeriodicSync) {
            self.schedule_periodic(now);
        }
        if due.is_empty() || !self.inner.monitor.should_sync() {
            return Ok(None);
        }

        tracing::debug!(?due, "scheduled sync due");
        match self.sync(SyncOptions::default()).await {
            Ok(report) => Ok(Some(report)),
            Err(Error::Offline) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Drive [`tick`](Self::tick) from a tokio interval until the handle is
    /// aborted.
    pub fn spawn_auto_sync(&self, poll: std::time::Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(error) = engine.tick().await {
                    tracing::warn!(error = %error, "scheduled sync failed");
                }
            }
        })
    }

    fn schedule_periodic(&self, from: DateTime<Utc>) {
        let due_at = from + self.inner.ctx.config.sync_interval();
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .schedule_once(due_at, ScheduledTask::PeriodicSync);
    }

    fn schedule_retry_wakeup(&self) -> Result<()> {
        if let Some(due_at) = self.inner.ctx.queue.next_retry_at()? {
            self.inner
                .scheduler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .schedule_once(due_at, ScheduledTask::RetryDue);
        }
        Ok(())
    }
}

/// Put an item back in line on top of `remote_version`, unblocking it if it
/// was parked behind `conflict_id`.
fn rebase_item(item: &mut SyncQueueItem, remote_version: Option<u64>, conflict_id: &str) {
    item.remote_version = remote_version;
    if let Some(payload) = item.payload.as_mut() {
        payload.meta.version_id = remote_version;
    }
    if item.status == QueueItemStatus::AwaitingResolution
        && item.conflict_id.as_deref() == Some(conflict_id)
    {
        item.status = QueueItemStatus::Pending;
        item.conflict_id = None;
        item.last_error = None;
        item.next_retry_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SequentialIds};
    use crate::db::MemoryStore;
    use crate::remote::{InMemoryRemote, RemoteOp};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        engine: SyncEngine,
        remote: Arc<InMemoryRemote>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
    }

    fn fixture(online: bool) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_717_243_200, 0).unwrap(),
        ));
        let remote = Arc::new(InMemoryRemote::with_clock(clock.clone()));
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::builder(store.clone(), remote.clone())
            .config(SyncConfig {
                tracked_resource_types: vec!["Observation".to_string()],
                ..SyncConfig::default()
            })
            .clock(clock.clone())
            .id_generator(Arc::new(SequentialIds::new("id")))
            .online(online)
            .build()
            .unwrap();
        Fixture {
            engine,
            remote,
            clock,
            store,
        }
    }

    fn observation(id: &str, value: i64) -> Resource {
        Resource::new("Observation", id).with_field("valueInteger", json!(value))
    }

    #[tokio::test]
    async fn sync_offline_is_rejected() {
        let f = fixture(false);
        assert!(matches!(
            f.engine.sync(SyncOptions::default()).await,
            Err(Error::Offline)
        ));
        assert_eq!(f.engine.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn status_tracks_queue() {
        let f = fixture(false);
        f.engine
            .queue_operation(
                Operation::Create,
                observation("", 7),
                &EnqueueOptions::default(),
            )
            .await
            .unwrap();
        let status = f.engine.get_sync_status();
        assert_eq!(status.pending_changes, 1);
        assert!(!status.is_online);

        let report = f.engine.set_online(true).await.unwrap().unwrap();
        assert_eq!(report.pushed, 1);
        let status = f.engine.get_sync_status();
        assert_eq!(status.pending_changes, 0);
        assert!(status.is_online);
        assert_eq!(status.last_sync_at, Some(f.clock.now()));
        assert_eq!(f.remote.calls(RemoteOp::Create), 1);
    }

    #[tokio::test]
    async fn urgent_change_syncs_immediately() {
        let f = fixture(true);
        f.engine
            .queue_operation(
                Operation::Create,
                observation("", 1),
                &EnqueueOptions::default().with_priority(crate::models::Priority::Critical),
            )
            .await
            .unwrap();
        assert_eq!(f.remote.resource_count(), 1);
        assert_eq!(f.engine.get_sync_status().pending_changes, 0);
    }

    #[tokio::test]
    async fn tick_runs_periodic_pass() {
        let f = fixture(true);
        assert!(f.engine.tick().await.unwrap().is_none());

        f.clock.advance(Duration::seconds(61));
        let report = f.engine.tick().await.unwrap();
        assert!(report.is_some());
        assert_eq!(
            f.engine.next_wakeup(),
            Some(f.clock.now() + Duration::seconds(60))
        );
    }

    #[tokio::test]
    async fn cleanup_purges_old_records() {
        let f = fixture(true);
        f.remote.fail_next(
            RemoteOp::Search,
            crate::remote::RemoteError::Timeout,
        );
        f.engine.sync(SyncOptions::pull_only()).await.unwrap();
        assert_eq!(f.engine.get_sync_status().errors.len(), 1);

        f.clock.advance(Duration::days(10));
        let report = f.engine.cleanup(7).unwrap();
        assert_eq!(report.errors_removed, 1);
        assert!(f.engine.get_sync_status().errors.is_empty());
    }

    #[tokio::test]
    async fn export_import_round_trip() {
        let f = fixture(false);
        f.engine
            .queue_operation(
                Operation::Update,
                observation("o1", 3),
                &EnqueueOptions::default(),
            )
            .await
            .unwrap();
        let export = f.engine.export_sync_data().unwrap();

        f.engine.clear_local_data().unwrap();
        assert_eq!(f.store.len(Collection::Queue), 0);
        assert_eq!(f.engine.get_sync_status().pending_changes, 0);

        f.engine.import_sync_data(&export).unwrap();
        assert_eq!(f.engine.get_sync_status().pending_changes, 1);
        assert_eq!(
            f.engine.get_resource("Observation", "o1").unwrap(),
            Some(export.resources[0].clone())
        );
    }

    #[tokio::test]
    async fn manual_resolution_cannot_defer_again() {
        let f = fixture(true);
        let resolution = Resolution {
            strategy: ConflictStrategy::Manual,
            winning_resource: observation("o1", 1),
            merged_resource: None,
            reason: String::new(),
        };
        let error = f
            .engine
            .resolve_conflict("missing", resolution, None)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }
}
