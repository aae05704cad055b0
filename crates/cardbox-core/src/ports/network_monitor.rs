//! Network monitor port (driven/secondary port)
//!
//! Connectivity state plus the two adaptive values derived from it: the
//! sync interval (from a rolling reliability score over recent cycles) and
//! the batch size (scaled down for low-quality links).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Link quality tier, coarsest useful granularity for batch scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Offline,
    Slow2G,
    TwoG,
    ThreeG,
    FourG,
}

impl QualityTier {
    /// Fraction of the maximum batch size this tier supports
    pub fn batch_scale(&self) -> f64 {
        match self {
            QualityTier::FourG => 1.0,
            QualityTier::ThreeG => 0.7,
            QualityTier::TwoG | QualityTier::Slow2G => 0.4,
            QualityTier::Offline => 0.0,
        }
    }
}

/// Current connectivity snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub online: bool,
    pub quality: QualityTier,
}

impl NetworkState {
    pub fn offline() -> Self {
        Self {
            online: false,
            quality: QualityTier::Offline,
        }
    }

    pub fn online(quality: QualityTier) -> Self {
        Self {
            online: true,
            quality,
        }
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::offline()
    }
}

/// Port trait for connectivity monitoring
///
/// Synchronous by design: every method is a cheap read of cached state,
/// and the dispatcher consults it on the hot path.
pub trait INetworkMonitor: Send + Sync {
    /// Current connectivity snapshot
    fn current_state(&self) -> NetworkState;

    /// True when the link is up
    fn is_online(&self) -> bool {
        self.current_state().online
    }

    /// Sync interval derived from the rolling reliability score
    fn adaptive_sync_interval(&self) -> Duration;

    /// Batch size for the current quality tier, clamped to `[min, max]`
    fn adaptive_batch_size(&self, min: usize, max: usize) -> usize;

    /// Feeds the outcome of one sync cycle into the reliability window
    fn record_cycle(&self, success: bool);

    /// Subscribes to state transitions. The receiver observes the current
    /// state immediately.
    fn subscribe(&self) -> watch::Receiver<NetworkState>;
}
