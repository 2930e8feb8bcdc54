//! Sync status and change notifications

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use super::queue::QueueStats;

/// Derived status, recomputed on demand and never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_operations: usize,
    pub failed_operations: usize,
    /// A full sync is running
    pub is_in_progress: bool,
}

type Listener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, Listener>>,
}

impl Listeners {
    fn snapshot(&self) -> Vec<Listener> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn remove(&self, id: u64) {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
    }
}

/// Shared status state and its observers
///
/// The processor and orchestrator update the flags and call
/// [`StatusHub::notify`] after every transition. Observers either register a
/// callback or watch the channel.
pub struct StatusHub {
    online: AtomicBool,
    in_progress: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    stats_rx: watch::Receiver<QueueStats>,
    status_tx: watch::Sender<SyncStatus>,
    listeners: Arc<Listeners>,
}

impl StatusHub {
    pub fn new(stats_rx: watch::Receiver<QueueStats>, last_sync: Option<DateTime<Utc>>) -> Self {
        let hub = Self {
            online: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            last_sync: Mutex::new(last_sync),
            stats_rx,
            status_tx: watch::channel(SyncStatus::default()).0,
            listeners: Arc::new(Listeners::default()),
        };
        hub.status_tx.send_replace(hub.snapshot());
        hub
    }

    /// Current status, without awaiting anything
    pub fn snapshot(&self) -> SyncStatus {
        let stats = self.stats_rx.borrow().clone();
        SyncStatus {
            is_online: self.online.load(Ordering::SeqCst),
            last_sync_time: self.last_sync(),
            pending_operations: stats.pending,
            failed_operations: stats.failed,
            is_in_progress: self.in_progress.load(Ordering::SeqCst),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_last_sync(&self, at: DateTime<Utc>) {
        *self.last_sync.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(at);
    }

    /// Claim the single full-sync slot; `false` if already taken
    pub fn try_begin_sync(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_sync(&self) {
        self.in_progress.store(false, Ordering::SeqCst);
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Publish the current status to every observer
    ///
    /// Callbacks run on the caller's task, outside of any lock, so a callback
    /// may unsubscribe itself.
    pub fn notify(&self) {
        let status = self.snapshot();
        self.status_tx.send_replace(status.clone());
        for callback in self.listeners.snapshot() {
            callback(&status);
        }
    }

    /// Register a callback fired after every status change
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Arc::new(callback));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Handle to a status callback; dropping it unsubscribes
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(self.id);
        }
    }
}
