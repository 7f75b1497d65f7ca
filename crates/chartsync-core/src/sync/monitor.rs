//! Network and app-lifecycle monitor

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// Change produced by a connectivity or lifecycle update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleTransition {
    CameOnline,
    WentOffline,
    Foregrounded,
    Backgrounded,
    Unchanged,
}

/// Tracks connectivity and foreground state. Platform adapters feed it;
/// the engine reacts to the returned transitions.
#[derive(Debug)]
pub struct NetworkMonitor {
    online: AtomicBool,
    foreground: AtomicBool,
    sync_in_background: bool,
    online_tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(online: bool, foreground: bool, sync_in_background: bool) -> Self {
        let (online_tx, _) = watch::channel(online);
        Self {
            online: AtomicBool::new(online),
            foreground: AtomicBool::new(foreground),
            sync_in_background,
            online_tx,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) -> LifecycleTransition {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return LifecycleTransition::Unchanged;
        }
        self.online_tx.send_replace(online);
        tracing::info!(online, "network status changed");
        if online {
            LifecycleTransition::CameOnline
        } else {
            LifecycleTransition::WentOffline
        }
    }

    pub fn set_foreground(&self, foreground: bool) -> LifecycleTransition {
        let was_foreground = self.foreground.swap(foreground, Ordering::SeqCst);
        if was_foreground == foreground {
            return LifecycleTransition::Unchanged;
        }
        tracing::debug!(foreground, "app lifecycle changed");
        if foreground {
            LifecycleTransition::Foregrounded
        } else {
            LifecycleTransition::Backgrounded
        }
    }

    /// Online, and either in the foreground or allowed to sync in background.
    pub fn should_sync(&self) -> bool {
        self.is_online() && (self.is_foreground() || self.sync_in_background)
    }

    /// Receiver that observes connectivity changes.
    pub fn watch_online(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }
}
