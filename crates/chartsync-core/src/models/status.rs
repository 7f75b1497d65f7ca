//! Sync status, progress and error log models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::queue_item::{Operation, SyncQueueItem};

/// Progress counters for the running pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub percentage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_resource: Option<String>,
}

impl SyncProgress {
    /// Recompute `percentage` from the counters, clamped to 100.
    pub fn recompute(&mut self) {
        let done = self.completed + self.failed;
        self.percentage = if self.total == 0 {
            100
        } else {
            u8::try_from((done * 100 / self.total).min(100)).unwrap_or(100)
        };
    }
}

/// Classification of a recorded sync error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncErrorKind {
    /// Network/server hiccup, rescheduled
    Transient,
    /// Payload rejected by the server, not retried
    Validation,
    /// Retries used up
    Exhausted,
    /// Waiting on a manual conflict resolution
    Conflict,
    /// Pull-side failure for a whole resource type
    Pull,
}

/// Entry of the bounded rolling error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    pub kind: SyncErrorKind,
    pub message: String,
    /// The item left the active queue because of this error
    pub terminal: bool,
    pub occurred_at: DateTime<Utc>,
}

impl SyncErrorRecord {
    /// Error record describing a failure of a specific queue item.
    pub fn for_item(
        id: String,
        item: &SyncQueueItem,
        kind: SyncErrorKind,
        message: impl Into<String>,
        terminal: bool,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            item_id: Some(item.id.clone()),
            resource_type: item.resource_type.clone(),
            resource_id: Some(item.resource_id.clone()),
            operation: Some(item.operation),
            kind,
            message: message.into(),
            terminal,
            occurred_at,
        }
    }
}

/// Point-in-time status snapshot. Derived, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_changes: usize,
    pub failed_changes: usize,
    pub conflicted_changes: usize,
    pub errors: Vec<SyncErrorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_progress: Option<SyncProgress>,
}
