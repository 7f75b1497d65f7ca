//! Sync machinery: queue, version lineage, conflicts and the pass orchestrator.

pub mod cache;
pub mod conflicts;
pub mod errors;
pub mod events;
pub mod merge;
pub mod monitor;
pub mod orchestrator;
pub mod queue;
pub mod resolver;
pub mod scheduler;
pub mod versions;

pub use cache::ResourceCache;
pub use conflicts::ConflictStore;
pub use errors::ErrorLog;
pub use events::{EventHandler, EventPublisher, SubscriptionId, SyncEvent, SyncEventKind};
pub use monitor::{LifecycleTransition, NetworkMonitor};
pub use orchestrator::{
    ErrorCallback, ProgressCallback, SyncContext, SyncDirection, SyncOptions, SyncPass,
    SyncReport,
};
pub use queue::{EnqueueOptions, FailureOutcome, QueueCounts, QueueFilter, QueueManager, RetryPolicy};
pub use resolver::{ConflictResolver, CustomResolver, MergeFn, ResolveOutcome};
pub use scheduler::{ScheduledTask, Scheduler};
pub use versions::{has_diverged, VersionTracker};

/// Metadata key holding the time the last pass finished.
pub const LAST_SYNC_KEY: &str = "last_sync_at";

/// Metadata key holding the global enqueue counter.
pub const QUEUE_SEQUENCE_KEY: &str = "queue_sequence";

/// Metadata key holding the rolling error log.
pub const ERROR_LOG_KEY: &str = "error_log";

/// Metadata key of the pull checkpoint for one resource type.
pub fn checkpoint_key(resource_type: &str) -> String {
    format!("checkpoint:{resource_type}")
}
