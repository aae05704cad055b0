//! Derived engine health indicator
//!
//! Health is a tri-state computed from two signals: the error rate over a
//! rolling window of recent sync cycles, and the current queue depth
//! measured against configured thresholds. Either signal alone can degrade
//! health; the worse of the two wins.

use std::collections::VecDeque;
use std::sync::Mutex;

use cardbox_core::config::HealthConfig;
use cardbox_core::domain::SyncHealth;

/// Rolling-window health assessment
pub struct HealthTracker {
    config: HealthConfig,
    window: Mutex<VecDeque<bool>>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        let capacity = config.window.max(1);
        Self {
            config,
            window: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Feeds the outcome of one sync cycle into the window
    pub fn record_cycle(&self, success: bool) {
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if window.len() == self.config.window.max(1) {
            window.pop_front();
        }
        window.push_back(success);
    }

    /// Fraction of recent cycles that failed; 0.0 with no history
    pub fn error_rate(&self) -> f64 {
        let window = self
            .window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if window.is_empty() {
            return 0.0;
        }
        let failures = window.iter().filter(|ok| !**ok).count();
        failures as f64 / window.len() as f64
    }

    /// Assesses health from the error rate and the current queue depth
    pub fn assess(&self, queue_depth: usize) -> SyncHealth {
        let rate = self.error_rate();
        if rate >= self.config.critical_error_rate || queue_depth >= self.config.critical_queue_depth
        {
            SyncHealth::Critical
        } else if rate >= self.config.warning_error_rate
            || queue_depth >= self.config.warning_queue_depth
        {
            SyncHealth::Warning
        } else {
            SyncHealth::Healthy
        }
    }
}
