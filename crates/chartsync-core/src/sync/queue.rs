//! Sync queue manager
//!
//! Owns the lifecycle of queued mutations: enqueue with read-your-writes
//! cache updates, per-resource FIFO dequeue, retry backoff and terminal
//! failure bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use super::cache::ResourceCache;
use super::errors::ErrorLog;
use super::versions::VersionTracker;
use crate::clock::{Clock, IdGenerator};
use crate::config::SyncConfig;
use crate::db::{Collection, Store, StoreExt, WriteBatch};
use crate::error::{Error, Result};
use crate::models::{
    ConflictStrategy, Operation, Priority, QueueItemStatus, Resource, ResourceKey,
    SyncErrorKind, SyncErrorRecord, SyncQueueItem,
};
use crate::remote::RemoteError;
use crate::util::TEMP_ID_PREFIX;

use super::QUEUE_SEQUENCE_KEY as SEQUENCE_KEY;

/// Retry settings applied to failed items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_retry_delay(),
            max_delay: config.max_retry_delay(),
        }
    }

    /// `base * 2^attempts`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 2_i32.checked_pow(attempts).unwrap_or(i32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Per-call overrides for [`QueueManager::enqueue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub priority: Option<Priority>,
    pub max_attempts: Option<u32>,
    pub conflict_strategy: Option<ConflictStrategy>,
    /// Server version the change is based on, when the caller knows it
    pub remote_version: Option<u64>,
}

impl EnqueueOptions {
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = Some(strategy);
        self
    }

    #[must_use]
    pub const fn with_remote_version(mut self, version: u64) -> Self {
        self.remote_version = Some(version);
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Restricts which items a dequeue may return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    /// Only these resource types, when set
    pub resource_types: Option<HashSet<String>>,
    /// Item ids already handled in the current pass
    pub exclude: HashSet<String>,
}

impl QueueFilter {
    fn admits(&self, item: &SyncQueueItem) -> bool {
        !self.exclude.contains(&item.id)
            && self
                .resource_types
                .as_ref()
                .map_or(true, |types| types.contains(&item.resource_type))
    }
}

/// What [`QueueManager::mark_failed`] did with the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Rescheduled { next_retry_at: DateTime<Utc> },
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Items still owed to the server (pending, in flight, awaiting resolution)
    pub active: usize,
    pub in_flight: usize,
    pub awaiting_resolution: usize,
    /// Terminal failures waiting for retry or discard
    pub failed: usize,
}

pub struct QueueManager {
    store: Arc<dyn Store>,
    versions: VersionTracker,
    cache: ResourceCache,
    errors: ErrorLog,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    policy: RetryPolicy,
    config: SyncConfig,
    write_lock: Mutex<()>,
}

impl QueueManager {
    pub fn new(
        store: Arc<dyn Store>,
        config: &SyncConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            versions: VersionTracker::new(store.clone()),
            cache: ResourceCache::new(store.clone()),
            errors: ErrorLog::new(store.clone(), config.error_log_limit),
            store,
            clock,
            ids,
            policy: RetryPolicy::from_config(config),
            config: config.clone(),
            write_lock: Mutex::new(()),
        }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        self.policy.backoff_delay(attempts)
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Database("queue lock poisoned".to_string()))
    }

    /// Queue a local mutation and make it visible in the cache.
    pub fn enqueue(
        &self,
        operation: Operation,
        mut resource: Resource,
        options: &EnqueueOptions,
    ) -> Result<SyncQueueItem> {
        if resource.resource_type.trim().is_empty() {
            return Err(Error::InvalidInput(
                "resource type must not be empty".to_string(),
            ));
        }
        if resource.id.is_empty() {
            if operation != Operation::Create {
                return Err(Error::InvalidInput(format!(
                    "{operation} of {} requires a resource id",
                    resource.resource_type
                )));
            }
            resource.id = format!("{TEMP_ID_PREFIX}{}", self.ids.next_id());
        }
        if options.max_attempts == Some(0) {
            return Err(Error::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let _guard = self.guard()?;
        let now = self.clock.now();
        let key = resource.key();

        let lineage = self.versions.current(&key)?;
        let local_version = lineage
            .as_ref()
            .map_or(1, |record| record.version.saturating_add(1));
        let cached = self.cache.get(&key)?;
        let remote_version = options
            .remote_version
            .or_else(|| cached.as_ref().and_then(Resource::version))
            .or_else(|| lineage.as_ref().and_then(|record| record.remote_version));

        resource.meta.version_id = remote_version;
        resource.meta.last_updated = Some(now);

        let sequence = self
            .store
            .get_json::<u64>(Collection::Metadata, SEQUENCE_KEY)?
            .unwrap_or(0)
            + 1;

        let item = SyncQueueItem {
            id: self.ids.next_id(),
            resource_type: key.resource_type.clone(),
            resource_id: key.id.clone(),
            operation,
            payload: (operation != Operation::Delete).then(|| resource.clone()),
            local_version,
            remote_version,
            attempts: 0,
            max_attempts: options.max_attempts.unwrap_or(self.policy.max_attempts),
            priority: options
                .priority
                .unwrap_or_else(|| self.config.priority_for(&key.resource_type)),
            status: QueueItemStatus::Pending,
            sequence,
            created_at: now,
            last_attempt_at: None,
            next_retry_at: None,
            conflict_resolution_override: options.conflict_strategy,
            conflict_id: None,
            last_error: None,
        };

        let mut batch = WriteBatch::new();
        batch.put(Collection::Queue, item.id.clone(), &item)?;
        batch.put(Collection::Metadata, SEQUENCE_KEY, &sequence)?;
        match operation {
            Operation::Create | Operation::Update => self.cache.stage_put(&mut batch, &resource)?,
            Operation::Delete => self.cache.stage_remove(&mut batch, &key),
        }
        self.versions.stage(
            &mut batch,
            &key,
            local_version,
            None,
            &resource.checksum(),
            now,
        )?;
        self.store.commit(batch)?;

        tracing::debug!(
            item_id = %item.id,
            resource = %key,
            operation = %operation,
            priority = %item.priority,
            local_version,
            "queued local change"
        );
        Ok(item)
    }

    pub fn get(&self, item_id: &str) -> Result<Option<SyncQueueItem>> {
        self.store.get_json(Collection::Queue, item_id)
    }

    pub fn all(&self) -> Result<Vec<SyncQueueItem>> {
        let mut items: Vec<SyncQueueItem> = self.store.scan_json(Collection::Queue)?;
        items.sort_by_key(|item| item.sequence);
        Ok(items)
    }

    /// Active items in enqueue order.
    pub fn list_active(&self) -> Result<Vec<SyncQueueItem>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(SyncQueueItem::is_active)
            .collect())
    }

    pub fn list_failed(&self) -> Result<Vec<SyncQueueItem>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|item| item.status == QueueItemStatus::Failed)
            .collect())
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        let mut counts = QueueCounts::default();
        for item in self.all()? {
            match item.status {
                QueueItemStatus::Failed => counts.failed += 1,
                QueueItemStatus::InFlight => {
                    counts.active += 1;
                    counts.in_flight += 1;
                }
                QueueItemStatus::AwaitingResolution => {
                    counts.active += 1;
                    counts.awaiting_resolution += 1;
                }
                QueueItemStatus::Pending => counts.active += 1,
            }
        }
        Ok(counts)
    }

    /// Earliest scheduled retry among pending items.
    pub fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .all()?
            .iter()
            .filter(|item| item.status == QueueItemStatus::Pending)
            .filter_map(|item| item.next_retry_at)
            .min())
    }

    /// Claim up to `limit` due items, marking them in flight.
    ///
    /// Only the oldest active item of each resource is eligible, so a later
    /// operation on a record never overtakes an earlier one.
    pub fn dequeue_batch(&self, limit: usize, filter: &QueueFilter) -> Result<Vec<SyncQueueItem>> {
        let _guard = self.guard()?;
        let now = self.clock.now();

        let mut heads: HashMap<ResourceKey, SyncQueueItem> = HashMap::new();
        for item in self.all()?.into_iter().filter(SyncQueueItem::is_active) {
            heads.entry(item.key()).or_insert(item);
        }

        let mut ready: Vec<SyncQueueItem> = heads
            .into_values()
            .filter(|item| item.is_due(now) && filter.admits(item))
            .collect();
        ready.sort_by(SyncQueueItem::dequeue_order);
        ready.truncate(limit);

        if ready.is_empty() {
            return Ok(ready);
        }

        let mut batch = WriteBatch::new();
        for item in &mut ready {
            item.status = QueueItemStatus::InFlight;
            item.last_attempt_at = Some(now);
            batch.put(Collection::Queue, item.id.clone(), &*item)?;
        }
        self.store.commit(batch)?;
        Ok(ready)
    }

    pub fn stage_put(&self, batch: &mut WriteBatch, item: &SyncQueueItem) -> Result<()> {
        batch.put(Collection::Queue, item.id.clone(), item)
    }

    /// Stage removal of a successfully applied item.
    pub fn stage_completion(&self, batch: &mut WriteBatch, item: &SyncQueueItem) {
        batch.delete(Collection::Queue, item.id.clone());
    }

    /// Record a failed attempt and either reschedule or retire the item.
    ///
    /// Returns the outcome together with the error-log record written for it.
    pub fn mark_failed(
        &self,
        item: &mut SyncQueueItem,
        error: &RemoteError,
    ) -> Result<(FailureOutcome, SyncErrorRecord)> {
        let now = self.clock.now();
        item.attempts = item.attempts.saturating_add(1);
        item.last_error = Some(error.to_string());

        let exhausted = !error.is_retryable() || item.attempts >= item.max_attempts;
        let (outcome, kind) = if exhausted {
            item.status = QueueItemStatus::Failed;
            item.next_retry_at = None;
            let kind = if error.is_retryable() {
                SyncErrorKind::Exhausted
            } else {
                SyncErrorKind::Validation
            };
            (FailureOutcome::Exhausted, kind)
        } else {
            let next_retry_at = now + self.policy.backoff_delay(item.attempts);
            item.status = QueueItemStatus::Pending;
            item.next_retry_at = Some(next_retry_at);
            (
                FailureOutcome::Rescheduled { next_retry_at },
                SyncErrorKind::Transient,
            )
        };

        let record = SyncErrorRecord::for_item(
            self.ids.next_id(),
            item,
            kind,
            error.to_string(),
            exhausted,
            now,
        );

        let mut batch = WriteBatch::new();
        self.stage_put(&mut batch, item)?;
        self.errors.stage_append(&mut batch, [record.clone()])?;
        self.store.commit(batch)?;

        match outcome {
            FailureOutcome::Exhausted => tracing::warn!(
                item_id = %item.id,
                resource = %item.key(),
                attempts = item.attempts,
                error = %error,
                "queue item failed permanently"
            ),
            FailureOutcome::Rescheduled { next_retry_at } => tracing::warn!(
                item_id = %item.id,
                resource = %item.key(),
                attempts = item.attempts,
                retry_at = %next_retry_at,
                error = %error,
                "queue item rescheduled"
            ),
        }
        Ok((outcome, record))
    }

    /// Park an item behind an unresolved manual conflict.
    ///
    /// Appends the conflict to the error log inside `batch`; callers must not
    /// stage another error-log write into the same batch.
    pub fn stage_awaiting_resolution(
        &self,
        batch: &mut WriteBatch,
        item: &mut SyncQueueItem,
        conflict_id: &str,
    ) -> Result<SyncErrorRecord> {
        let now = self.clock.now();
        item.status = QueueItemStatus::AwaitingResolution;
        item.conflict_id = Some(conflict_id.to_string());
        item.next_retry_at = None;
        item.last_error = Some("manual resolution required".to_string());
        let record = SyncErrorRecord::for_item(
            self.ids.next_id(),
            item,
            SyncErrorKind::Conflict,
            format!("manual resolution required (conflict {conflict_id})"),
            false,
            now,
        );
        self.stage_put(batch, item)?;
        self.errors.stage_append(batch, [record.clone()])?;
        Ok(record)
    }

    /// Items parked behind the given conflict.
    pub fn awaiting(&self, conflict_id: &str) -> Result<Vec<SyncQueueItem>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|item| {
                item.status == QueueItemStatus::AwaitingResolution
                    && item.conflict_id.as_deref() == Some(conflict_id)
            })
            .collect())
    }

    /// Return claimed items to pending without counting an attempt.
    pub fn release(&self, items: &[SyncQueueItem]) -> Result<()> {
        let mut batch = WriteBatch::new();
        for item in items {
            let mut item = item.clone();
            item.status = QueueItemStatus::Pending;
            self.stage_put(&mut batch, &item)?;
        }
        self.store.commit(batch)
    }

    /// Reset in-flight markers left behind by a crashed process.
    pub fn recover_in_flight(&self) -> Result<usize> {
        let _guard = self.guard()?;
        let stale: Vec<SyncQueueItem> = self
            .all()?
            .into_iter()
            .filter(|item| item.status == QueueItemStatus::InFlight)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        self.release(&stale)?;
        tracing::info!(count = stale.len(), "recovered in-flight queue items");
        Ok(stale.len())
    }

    /// Put a terminally failed item back into the active queue.
    pub fn requeue_failed(&self, item_id: &str) -> Result<SyncQueueItem> {
        let _guard = self.guard()?;
        let mut item = self.failed_item(item_id)?;
        item.status = QueueItemStatus::Pending;
        item.attempts = 0;
        item.next_retry_at = None;
        item.last_error = None;

        let mut batch = WriteBatch::new();
        self.stage_put(&mut batch, &item)?;
        self.errors.stage_forget_item(&mut batch, item_id)?;
        self.store.commit(batch)?;
        tracing::info!(item_id, resource = %item.key(), "requeued failed item");
        Ok(item)
    }

    /// Drop a terminally failed item for good.
    pub fn discard(&self, item_id: &str) -> Result<SyncQueueItem> {
        let _guard = self.guard()?;
        let item = self.failed_item(item_id)?;

        let mut batch = WriteBatch::new();
        batch.delete(Collection::Queue, item_id);
        self.errors.stage_forget_item(&mut batch, item_id)?;
        self.store.commit(batch)?;
        tracing::info!(item_id, resource = %item.key(), "discarded failed item");
        Ok(item)
    }

    fn failed_item(&self, item_id: &str) -> Result<SyncQueueItem> {
        let item = self
            .get(item_id)?
            .ok_or_else(|| Error::NotFound(format!("queue item {item_id}")))?;
        if item.status != QueueItemStatus::Failed {
            return Err(Error::InvalidInput(format!(
                "queue item {item_id} is {:?}, not failed",
                item.status
            )));
        }
        Ok(item)
    }

    /// Rebase later queued items of a resource onto a confirmed server write.
    ///
    /// Items move to the server-assigned id (when it changed) and adopt
    /// `remote_version` as their base, since they were queued on top of the
    /// change the server just accepted.
    pub fn stage_rebase(
        &self,
        batch: &mut WriteBatch,
        from: &ResourceKey,
        to: &ResourceKey,
        remote_version: Option<u64>,
        skip_item: &str,
    ) -> Result<usize> {
        let mut moved = 0;
        for mut item in self.all()? {
            if item.id == skip_item || !item.is_active() || item.key() != *from {
                continue;
            }
            item.resource_id.clone_from(&to.id);
            if remote_version.is_some() {
                item.remote_version = remote_version;
            }
            if let Some(payload) = item.payload.as_mut() {
                payload.id.clone_from(&to.id);
                payload.meta.version_id = item.remote_version;
            }
            self.stage_put(batch, &item)?;
            moved += 1;
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SequentialIds};
    use crate::db::MemoryStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<dyn Store>,
        clock: Arc<ManualClock>,
        queue: QueueManager,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let queue = QueueManager::new(
            store.clone(),
            &SyncConfig::default(),
            clock.clone(),
            Arc::new(SequentialIds::new("id")),
        );
        Fixture {
            store,
            clock,
            queue,
        }
    }

    fn patient(id: &str) -> Resource {
        Resource::new("Patient", id).with_field("active", json!(true))
    }

    #[test]
    fn enqueue_assigns_version_priority_and_cache() {
        let f = fixture();
        let item = f
            .queue
            .enqueue(Operation::Create, patient(""), &EnqueueOptions::default())
            .unwrap();

        assert!(item.resource_id.starts_with(TEMP_ID_PREFIX));
        assert_eq!(item.local_version, 1);
        assert_eq!(item.priority, Priority::Critical);
        assert_eq!(item.sequence, 1);

        let cache = ResourceCache::new(f.store.clone());
        let cached = cache.get(&item.key()).unwrap().unwrap();
        assert_eq!(cached.field("active"), Some(&json!(true)));

        let next = f
            .queue
            .enqueue(
                Operation::Update,
                patient(&item.resource_id),
                &EnqueueOptions::default(),
            )
            .unwrap();
        assert_eq!(next.local_version, 2);
        assert_eq!(next.sequence, 2);
    }

    #[test]
    fn enqueue_rejects_update_without_id() {
        let f = fixture();
        let error = f
            .queue
            .enqueue(Operation::Update, patient(""), &EnqueueOptions::default())
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[test]
    fn delete_removes_cache_entry() {
        let f = fixture();
        let update = f
            .queue
            .enqueue(Operation::Update, patient("p1"), &EnqueueOptions::default())
            .unwrap();
        let delete = f
            .queue
            .enqueue(Operation::Delete, patient("p1"), &EnqueueOptions::default())
            .unwrap();
        assert!(update.payload.is_some());
        assert!(delete.payload.is_none());
        assert!(f.queue.get(&delete.id).unwrap().unwrap().payload.is_none());
        let cache = ResourceCache::new(f.store.clone());
        assert!(cache.get(&ResourceKey::new("Patient", "p1")).unwrap().is_none());
    }

    #[test]
    fn dequeue_only_returns_resource_heads() {
        let f = fixture();
        let low = EnqueueOptions::default().with_priority(Priority::Low);
        let critical = EnqueueOptions::default().with_priority(Priority::Critical);
        let first = f.queue.enqueue(Operation::Update, patient("p1"), &low).unwrap();
        f.queue
            .enqueue(Operation::Update, patient("p1"), &critical)
            .unwrap();
        let other = f
            .queue
            .enqueue(Operation::Update, patient("p2"), &critical)
            .unwrap();

        let batch = f.queue.dequeue_batch(10, &QueueFilter::default()).unwrap();
        let ids: Vec<&str> = batch.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec![other.id.as_str(), first.id.as_str()]);
        assert!(batch
            .iter()
            .all(|item| item.status == QueueItemStatus::InFlight));

        // Heads are in flight, so nothing else is eligible.
        assert!(f
            .queue
            .dequeue_batch(10, &QueueFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn dequeue_respects_filter() {
        let f = fixture();
        f.queue
            .enqueue(Operation::Update, patient("p1"), &EnqueueOptions::default())
            .unwrap();
        f.queue
            .enqueue(
                Operation::Update,
                Resource::new("Observation", "o1"),
                &EnqueueOptions::default(),
            )
            .unwrap();

        let filter = QueueFilter {
            resource_types: Some(HashSet::from(["Observation".to_string()])),
            ..QueueFilter::default()
        };
        let batch = f.queue.dequeue_batch(10, &filter).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].resource_type, "Observation");
    }

    #[test]
    fn mark_failed_reschedules_then_exhausts() {
        let f = fixture();
        f.queue
            .enqueue(Operation::Update, patient("p1"), &EnqueueOptions::default())
            .unwrap();
        let error = RemoteError::Timeout;

        for attempt in 1..=2 {
            let mut item = f
                .queue
                .dequeue_batch(1, &QueueFilter::default())
                .unwrap()
                .remove(0);
            let (outcome, record) = f.queue.mark_failed(&mut item, &error).unwrap();
            assert!(matches!(outcome, FailureOutcome::Rescheduled { .. }));
            assert!(!record.terminal);
            assert_eq!(item.attempts, attempt);

            // Not due until the backoff elapses.
            assert!(f
                .queue
                .dequeue_batch(1, &QueueFilter::default())
                .unwrap()
                .is_empty());
            f.clock.advance(Duration::hours(1));
        }

        let mut item = f
            .queue
            .dequeue_batch(1, &QueueFilter::default())
            .unwrap()
            .remove(0);
        let (outcome, record) = f.queue.mark_failed(&mut item, &error).unwrap();
        assert_eq!(outcome, FailureOutcome::Exhausted);
        assert_eq!(record.kind, SyncErrorKind::Exhausted);
        assert!(record.terminal);

        let counts = f.queue.counts().unwrap();
        assert_eq!(counts.active, 0);
        assert_eq!(counts.failed, 1);
        f.clock.advance(Duration::days(1));
        assert!(f
            .queue
            .dequeue_batch(1, &QueueFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn invalid_payload_is_not_retried() {
        let f = fixture();
        f.queue
            .enqueue(Operation::Create, patient(""), &EnqueueOptions::default())
            .unwrap();
        let mut item = f
            .queue
            .dequeue_batch(1, &QueueFilter::default())
            .unwrap()
            .remove(0);
        let (outcome, record) = f
            .queue
            .mark_failed(&mut item, &RemoteError::Invalid("bad gender".into()))
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Exhausted);
        assert_eq!(record.kind, SyncErrorKind::Validation);
        assert_eq!(item.attempts, 1);
    }

    #[test]
    fn backoff_grows_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::seconds(1),
            max_delay: Duration::seconds(30),
        };
        assert_eq!(policy.backoff_delay(1), Duration::seconds(2));
        assert_eq!(policy.backoff_delay(2), Duration::seconds(4));
        assert_eq!(policy.backoff_delay(4), Duration::seconds(16));
        assert_eq!(policy.backoff_delay(5), Duration::seconds(30));
        assert_eq!(policy.backoff_delay(40), Duration::seconds(30));
    }

    #[test]
    fn requeue_and_discard_failed() {
        let f = fixture();
        for id in ["p1", "p2"] {
            f.queue
                .enqueue(Operation::Update, patient(id), &EnqueueOptions::default())
                .unwrap();
        }
        for mut item in f.queue.dequeue_batch(2, &QueueFilter::default()).unwrap() {
            f.queue
                .mark_failed(&mut item, &RemoteError::Invalid("nope".into()))
                .unwrap();
        }
        let failed = f.queue.list_failed().unwrap();
        assert_eq!(failed.len(), 2);

        let requeued = f.queue.requeue_failed(&failed[0].id).unwrap();
        assert_eq!(requeued.status, QueueItemStatus::Pending);
        assert_eq!(requeued.attempts, 0);

        f.queue.discard(&failed[1].id).unwrap();
        let counts = f.queue.counts().unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.failed, 0);

        assert!(matches!(
            f.queue.discard(&failed[0].id),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.queue.requeue_failed("missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn recovery_returns_in_flight_items_to_pending() {
        let f = fixture();
        f.queue
            .enqueue(Operation::Update, patient("p1"), &EnqueueOptions::default())
            .unwrap();
        f.queue.dequeue_batch(1, &QueueFilter::default()).unwrap();
        assert_eq!(f.queue.counts().unwrap().in_flight, 1);

        assert_eq!(f.queue.recover_in_flight().unwrap(), 1);
        assert_eq!(f.queue.counts().unwrap().in_flight, 0);
        assert_eq!(
            f.queue
                .dequeue_batch(1, &QueueFilter::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn stage_rebase_moves_later_items() {
        let f = fixture();
        let create = f
            .queue
            .enqueue(Operation::Create, patient(""), &EnqueueOptions::default())
            .unwrap();
        let update = f
            .queue
            .enqueue(
                Operation::Update,
                patient(&create.resource_id),
                &EnqueueOptions::default(),
            )
            .unwrap();

        let mut batch = WriteBatch::new();
        let moved = f
            .queue
            .stage_rebase(
                &mut batch,
                &create.key(),
                &ResourceKey::new("Patient", "srv-1"),
                Some(1),
                &create.id,
            )
            .unwrap();
        f.store.commit(batch).unwrap();

        assert_eq!(moved, 1);
        let update = f.queue.get(&update.id).unwrap().unwrap();
        assert_eq!(update.resource_id, "srv-1");
        assert_eq!(update.remote_version, Some(1));
        assert_eq!(update.payload.unwrap().id, "srv-1");
    }
}
