//! Sync queue item model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conflict::ConflictStrategy;
use super::resource::{Resource, ResourceKey};
use crate::error::Error;

/// Kind of mutation a queue item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation {other:?}"))),
        }
    }
}

/// Clinical urgency band. Declaration order is ascending priority.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// High and critical changes trigger an immediate pass when online.
    pub const fn is_urgent(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(Error::InvalidInput(format!("unknown priority {other:?}"))),
        }
    }
}

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueItemStatus {
    /// Waiting to be dequeued (possibly after a backoff delay)
    Pending,
    /// Claimed by the running pass
    InFlight,
    /// Blocked on a manual conflict resolution
    AwaitingResolution,
    /// Terminal failure; needs an explicit retry or discard
    Failed,
}

/// A pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: String,
    pub resource_type: String,
    /// May be a temporary `local-` id until the create is confirmed
    pub resource_id: String,
    pub operation: Operation,
    /// Resource body for create/update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Resource>,
    pub local_version: u64,
    /// Remote version the change was based on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<u64>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub priority: Priority,
    pub status: QueueItemStatus,
    /// Global enqueue order, persisted so FIFO survives restarts
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_resolution_override: Option<ConflictStrategy>,
    /// Conflict blocking this item while awaiting manual resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type.clone(), self.resource_id.clone())
    }

    /// Still part of the active queue (anything but a terminal failure).
    pub fn is_active(&self) -> bool {
        self.status != QueueItemStatus::Failed
    }

    /// Eligible for dequeue at `now`, ignoring per-resource ordering.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueItemStatus::Pending && self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// Dequeue order: priority descending, then oldest first.
    pub fn dequeue_order(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.sequence.cmp(&other.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(priority: Priority, created_secs: i64, sequence: u64) -> SyncQueueItem {
        SyncQueueItem {
            id: format!("q{sequence}"),
            resource_type: "Observation".to_string(),
            resource_id: "o1".to_string(),
            operation: Operation::Update,
            payload: None,
            local_version: 1,
            remote_version: None,
            attempts: 0,
            max_attempts: 3,
            priority,
            status: QueueItemStatus::Pending,
            sequence,
            created_at: DateTime::from_timestamp(created_secs, 0).unwrap(),
            last_attempt_at: None,
            next_retry_at: None,
            conflict_resolution_override: None,
            conflict_id: None,
            last_error: None,
        }
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert!(Priority::High.is_urgent());
        assert!(!Priority::Medium.is_urgent());
    }

    #[test]
    fn priority_and_operation_parse() {
        assert_eq!("Critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!("delete".parse::<Operation>().unwrap(), Operation::Delete);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn dequeue_order_priority_then_fifo() {
        let mut items = [
            item(Priority::Low, 1, 1),
            item(Priority::High, 5, 2),
            item(Priority::High, 3, 3),
            item(Priority::Low, 1, 4),
        ];
        items.sort_by(SyncQueueItem::dequeue_order);
        let order: Vec<u64> = items.iter().map(|i| i.sequence).collect();
        assert_eq!(order, vec![3, 2, 1, 4]);
    }

    #[test]
    fn is_due_respects_retry_time() {
        let mut pending = item(Priority::Low, 0, 1);
        let now = DateTime::from_timestamp(100, 0).unwrap();
        assert!(pending.is_due(now));

        pending.next_retry_at = DateTime::from_timestamp(200, 0);
        assert!(!pending.is_due(now));

        pending.next_retry_at = None;
        pending.status = QueueItemStatus::InFlight;
        assert!(!pending.is_due(now));
    }
}
