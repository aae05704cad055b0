//! Status notifier - pub/sub broadcasting of sync events
//!
//! Three independent channels: status snapshots, conflict records, and
//! progress updates. Guarantees:
//!
//! - On subscribe, the current [`SyncStatus`] is replayed immediately, so
//!   no state change is missed between computation and subscription.
//! - A panicking listener never prevents delivery to the remaining
//!   listeners.
//! - Unsubscribing is idempotent.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::warn;

use cardbox_core::domain::{ConflictRecord, SyncProgress, SyncStatus};

type StatusCallback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;
type ConflictCallback = Arc<dyn Fn(&ConflictRecord) + Send + Sync>;
type ProgressCallback = Arc<dyn Fn(&SyncProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Status,
    Conflict,
    Progress,
}

struct Inner {
    next_id: AtomicU64,
    status_listeners: DashMap<u64, StatusCallback>,
    conflict_listeners: DashMap<u64, ConflictCallback>,
    progress_listeners: DashMap<u64, ProgressCallback>,
    current_status: Mutex<SyncStatus>,
}

/// Handle returned from a subscription; detach with
/// [`unsubscribe`](Subscription::unsubscribe)
pub struct Subscription {
    id: u64,
    channel: Channel,
    inner: Arc<Inner>,
}

impl Subscription {
    /// Removes the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        match self.channel {
            Channel::Status => {
                self.inner.status_listeners.remove(&self.id);
            }
            Channel::Conflict => {
                self.inner.conflict_listeners.remove(&self.id);
            }
            Channel::Progress => {
                self.inner.progress_listeners.remove(&self.id);
            }
        }
    }
}

/// Broadcaster of sync status, conflict, and progress events
#[derive(Clone)]
pub struct StatusNotifier {
    inner: Arc<Inner>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                status_listeners: DashMap::new(),
                conflict_listeners: DashMap::new(),
                progress_listeners: DashMap::new(),
                current_status: Mutex::new(SyncStatus::default()),
            }),
        }
    }

    /// The last broadcast status snapshot
    pub fn current_status(&self) -> SyncStatus {
        self.inner
            .current_status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Subscribes to status changes. The current status is delivered to
    /// the listener before this call returns.
    pub fn on_status_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let callback: StatusCallback = Arc::new(callback);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.status_listeners.insert(id, callback.clone());

        // Replay the current snapshot so the subscriber never observes a
        // gap between reading state and subscribing.
        let current = self.current_status();
        deliver(&callback, &current);

        Subscription {
            id,
            channel: Channel::Status,
            inner: self.inner.clone(),
        }
    }

    /// Subscribes to conflict events
    pub fn on_conflict<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConflictRecord) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.conflict_listeners.insert(id, Arc::new(callback));
        Subscription {
            id,
            channel: Channel::Conflict,
            inner: self.inner.clone(),
        }
    }

    /// Subscribes to progress events
    pub fn on_progress<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncProgress) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.progress_listeners.insert(id, Arc::new(callback));
        Subscription {
            id,
            channel: Channel::Progress,
            inner: self.inner.clone(),
        }
    }

    /// Stores the new status snapshot and broadcasts it
    pub fn emit_status(&self, status: SyncStatus) {
        {
            let mut current = self
                .inner
                .current_status
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *current = status.clone();
        }
        let listeners: Vec<StatusCallback> = self
            .inner
            .status_listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for listener in listeners {
            deliver(&listener, &status);
        }
    }

    /// Broadcasts a detected or resolved conflict
    pub fn emit_conflict(&self, record: &ConflictRecord) {
        let listeners: Vec<ConflictCallback> = self
            .inner
            .conflict_listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for listener in listeners {
            deliver(&listener, record);
        }
    }

    /// Broadcasts sync cycle progress
    pub fn emit_progress(&self, progress: &SyncProgress) {
        let listeners: Vec<ProgressCallback> = self
            .inner
            .progress_listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for listener in listeners {
            deliver(&listener, progress);
        }
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Invokes one listener, isolating panics so one bad subscriber cannot
/// break delivery to the rest
fn deliver<T>(listener: &Arc<dyn Fn(&T) + Send + Sync>, event: &T) {
    if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
        warn!("event listener panicked, continuing delivery");
    }
}
