//! Adaptive network monitor
//!
//! Keeps a bounded window of recent sync cycle outcomes. The fraction of
//! successful cycles (`r`) drives the sync interval:
//!
//! | reliability | interval |
//! |-------------|----------|
//! | r < 0.5     | 3 min    |
//! | r < 0.8     | 2 min    |
//! | r < 0.95    | 1 min    |
//! | otherwise   | 30 s     |
//!
//! An empty window counts as fully reliable. Batch size scales with the
//! quality tier (4G 100%, 3G 70%, 2G/slow-2G 40%, offline minimum).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use cardbox_core::ports::{INetworkMonitor, NetworkState, QualityTier};

const DEFAULT_WINDOW: usize = 20;

struct Inner {
    state: NetworkState,
    /// Recent cycle outcomes, oldest first
    window: VecDeque<bool>,
}

/// Network monitor fed by the platform layer
///
/// `set_link` is the write side (platform connectivity callbacks);
/// `record_cycle` is fed by the orchestrator after every sync cycle.
pub struct AdaptiveNetworkMonitor {
    inner: Mutex<Inner>,
    window_size: usize,
    tx: watch::Sender<NetworkState>,
}

impl AdaptiveNetworkMonitor {
    /// Starts offline with an empty reliability window
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Starts offline with a custom reliability window size
    pub fn with_window(window_size: usize) -> Self {
        let state = NetworkState::offline();
        let (tx, _) = watch::channel(state);
        Self {
            inner: Mutex::new(Inner {
                state,
                window: VecDeque::with_capacity(window_size),
            }),
            window_size: window_size.max(1),
            tx,
        }
    }

    /// Updates the link state. Emits a transition event to subscribers
    /// when the state actually changes.
    pub fn set_link(&self, state: NetworkState) {
        let changed = {
            let mut inner = self
                .inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let changed = inner.state != state;
            inner.state = state;
            changed
        };
        if changed {
            info!(online = state.online, quality = ?state.quality, "network state changed");
            let _ = self.tx.send(state);
        }
    }

    /// Fraction of recent cycles that succeeded; 1.0 with no history
    pub fn reliability(&self) -> f64 {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.window.is_empty() {
            return 1.0;
        }
        let successes = inner.window.iter().filter(|ok| **ok).count();
        successes as f64 / inner.window.len() as f64
    }
}

impl Default for AdaptiveNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl INetworkMonitor for AdaptiveNetworkMonitor {
    fn current_state(&self) -> NetworkState {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .state
    }

    fn adaptive_sync_interval(&self) -> Duration {
        if !self.is_online() {
            return Duration::from_secs(180);
        }
        let r = self.reliability();
        if r < 0.5 {
            Duration::from_secs(180)
        } else if r < 0.8 {
            Duration::from_secs(120)
        } else if r < 0.95 {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(30)
        }
    }

    fn adaptive_batch_size(&self, min: usize, max: usize) -> usize {
        let quality = self.current_state().quality;
        if quality == QualityTier::Offline {
            return min;
        }
        let scaled = (max as f64 * quality.batch_scale()).round() as usize;
        scaled.clamp(min, max)
    }

    fn record_cycle(&self, success: bool) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.window.len() == self.window_size {
            inner.window.pop_front();
        }
        inner.window.push_back(success);
    }

    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}
