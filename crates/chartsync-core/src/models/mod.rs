//! Data models for chartsync

mod conflict;
mod queue_item;
mod resource;
mod status;
mod version;

pub use conflict::{ConflictStrategy, Resolution, SyncConflict};
pub use queue_item::{Operation, Priority, QueueItemStatus, SyncQueueItem};
pub use resource::{Coding, Resource, ResourceKey, ResourceMeta};
pub use status::{SyncErrorKind, SyncErrorRecord, SyncProgress, SyncStatus};
pub use version::{ResourceVersion, VersionStamp};
