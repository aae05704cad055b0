//! Status, progress, and batch result values broadcast by the engine
//!
//! [`SyncStatus`] is the single process-wide snapshot recomputed after every
//! state-changing operation. [`BatchResult`] is produced per dispatch cycle
//! and kept in a bounded rolling history for diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::entity::EntityType;
use super::newtypes::{BatchId, OperationId};

/// Process-wide sync state snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub sync_in_progress: bool,
    pub pending_operations: usize,
    pub has_conflicts: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_online: false,
            sync_in_progress: false,
            pending_operations: 0,
            has_conflicts: false,
            last_sync_time: None,
        }
    }
}

/// Phase of a running sync cycle, reported via progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    PullPhase,
    PushPhase,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::PullPhase => write!(f, "pull"),
            SyncPhase::PushPhase => write!(f, "push"),
        }
    }
}

/// Incremental progress of a sync cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub entity_type: Option<EntityType>,
    pub completed: usize,
    pub total: usize,
}

impl SyncProgress {
    /// Completion as a fraction in `0.0..=1.0`; a zero-total cycle counts
    /// as complete
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// One terminal operation failure inside a dispatch cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    pub operation_id: OperationId,
    pub error_kind: String,
    pub message: String,
}

/// Outcome of one dispatch cycle for one entity type
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub batch_id: BatchId,
    pub entity_type: EntityType,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<BatchError>,
    pub duration: Duration,
}

impl BatchResult {
    /// An empty result for a cycle that found nothing to dispatch
    pub fn empty(entity_type: EntityType) -> Self {
        Self {
            batch_id: BatchId::new(),
            entity_type,
            processed: 0,
            successful: 0,
            failed: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Fraction of processed operations that succeeded; an empty batch
    /// counts as fully successful
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            1.0
        } else {
            self.successful as f64 / self.processed as f64
        }
    }

    /// Operations per second over the batch duration
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.processed as f64 / secs
        }
    }
}

/// Derived tri-state health indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncHealth {
    Healthy,
    Warning,
    Critical,
}

impl fmt::Display for SyncHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncHealth::Healthy => write!(f, "healthy"),
            SyncHealth::Warning => write!(f, "warning"),
            SyncHealth::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_offline_idle() {
        let status = SyncStatus::default();
        assert!(!status.is_online);
        assert!(!status.sync_in_progress);
        assert_eq!(status.pending_operations, 0);
        assert!(status.last_sync_time.is_none());
    }

    #[test]
    fn test_progress_fraction() {
        let progress = SyncProgress {
            phase: SyncPhase::PushPhase,
            entity_type: Some(EntityType::Card),
            completed: 3,
            total: 4,
        };
        assert!((progress.fraction() - 0.75).abs() < f64::EPSILON);

        let empty = SyncProgress {
            phase: SyncPhase::Idle,
            entity_type: None,
            completed: 0,
            total: 0,
        };
        assert_eq!(empty.fraction(), 1.0);
    }

    #[test]
    fn test_batch_result_rates() {
        let result = BatchResult {
            batch_id: BatchId::new(),
            entity_type: EntityType::Card,
            processed: 10,
            successful: 8,
            failed: 2,
            errors: Vec::new(),
            duration: Duration::from_secs(2),
        };
        assert!((result.success_rate() - 0.8).abs() < f64::EPSILON);
        assert!((result.throughput() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_batch_result() {
        let result = BatchResult::empty(EntityType::Tag);
        assert_eq!(result.processed, 0);
        assert_eq!(result.success_rate(), 1.0);
        assert_eq!(result.throughput(), 0.0);
        assert_eq!(result.duration, Duration::ZERO);
    }
}
