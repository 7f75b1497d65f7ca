//! Event and status publisher
//!
//! Handlers registered with [`EventPublisher::on`] run synchronously in
//! registration order. Async consumers can instead take a broadcast receiver
//! from [`EventPublisher::subscribe`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::orchestrator::SyncReport;
use crate::models::{SyncConflict, SyncProgress, SyncStatus};

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEventKind {
    SyncStarted,
    SyncProgress,
    SyncCompleted,
    SyncFailed,
    ConflictDetected,
    ConflictResolved,
    NetworkStatusChanged,
    StatusUpdated,
}

impl SyncEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SyncStarted => "sync-started",
            Self::SyncProgress => "sync-progress",
            Self::SyncCompleted => "sync-completed",
            Self::SyncFailed => "sync-failed",
            Self::ConflictDetected => "conflict-detected",
            Self::ConflictResolved => "conflict-resolved",
            Self::NetworkStatusChanged => "network-status-changed",
            Self::StatusUpdated => "status-updated",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    SyncStarted,
    SyncProgress(SyncProgress),
    SyncCompleted(SyncReport),
    SyncFailed { message: String },
    ConflictDetected(SyncConflict),
    ConflictResolved(SyncConflict),
    NetworkStatusChanged { online: bool },
    StatusUpdated(SyncStatus),
}

impl SyncEvent {
    pub const fn kind(&self) -> SyncEventKind {
        match self {
            Self::SyncStarted => SyncEventKind::SyncStarted,
            Self::SyncProgress(_) => SyncEventKind::SyncProgress,
            Self::SyncCompleted(_) => SyncEventKind::SyncCompleted,
            Self::SyncFailed { .. } => SyncEventKind::SyncFailed,
            Self::ConflictDetected(_) => SyncEventKind::ConflictDetected,
            Self::ConflictResolved(_) => SyncEventKind::ConflictResolved,
            Self::NetworkStatusChanged { .. } => SyncEventKind::NetworkStatusChanged,
            Self::StatusUpdated(_) => SyncEventKind::StatusUpdated,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Handle returned by [`EventPublisher::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    kind: SyncEventKind,
    handler: EventHandler,
}

pub struct EventPublisher {
    handlers: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher").finish_non_exhaustive()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            sender,
        }
    }

    pub fn on(&self, kind: SyncEventKind, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Registration { id, kind, handler });
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self
            .handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|registration| registration.id != id);
        handlers.len() != before
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: &SyncEvent) {
        let kind = event.kind();
        // Handlers may register or unregister from inside a callback.
        let matching: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|registration| registration.kind == kind)
            .map(|registration| registration.handler.clone())
            .collect();

        for handler in matching {
            handler(event);
        }

        // No receivers is fine.
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let publisher = EventPublisher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = seen.clone();
            publisher.on(
                SyncEventKind::SyncStarted,
                Arc::new(move |_event: &SyncEvent| seen.lock().unwrap().push(label)),
            );
        }
        publisher.publish(&SyncEvent::SyncStarted);

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn off_and_kind_filtering() {
        let publisher = EventPublisher::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let id = publisher.on(
            SyncEventKind::NetworkStatusChanged,
            Arc::new(move |_event: &SyncEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        publisher.publish(&SyncEvent::SyncStarted);
        publisher.publish(&SyncEvent::NetworkStatusChanged { online: true });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(publisher.off(id));
        assert!(!publisher.off(id));
        publisher.publish(&SyncEvent::NetworkStatusChanged { online: false });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broadcast_subscribers_receive_events() {
        let publisher = EventPublisher::new();
        let mut rx = publisher.subscribe();
        publisher.publish(&SyncEvent::SyncFailed {
            message: "offline".to_string(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), SyncEventKind::SyncFailed);
        assert_eq!(event.kind().as_str(), "sync-failed");
    }
}
