//! Queued sync operations and the dead-letter record
//!
//! A [`SyncOperation`] is one unit of outbound work: create, update, or
//! delete a single entity against the remote store. Operations are durable
//! (they survive restarts via the local store) and ordered by priority
//! first, enqueue sequence second.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{EntityPayload, EntityType};
use super::newtypes::{EntityId, OperationId};

/// What the operation does to its entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Dispatch priority. Higher priorities drain first; within a priority
/// operations keep enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// One durable unit of outbound sync work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    /// Entity snapshot at enqueue time. Deletes carry the full payload too,
    /// since deletion is soft and syncs the tombstoned record.
    pub payload: EntityPayload,
    pub priority: Priority,
    /// Queue-assigned monotonic sequence; ties within a priority break by
    /// this, giving per-entity FIFO. Zero until the queue accepts the op.
    pub sequence: u64,
    pub enqueued_at: DateTime<Utc>,
    /// Attempts so far. Incremented on requeue after a retryable failure.
    pub retry_count: u32,
}

impl SyncOperation {
    /// Builds a new operation around an entity snapshot with default
    /// priority. The queue assigns `sequence` on accept.
    pub fn new(kind: OperationKind, payload: EntityPayload, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            payload,
            priority: Priority::default(),
            sequence: 0,
            enqueued_at,
            retry_count: 0,
        }
    }

    /// Sets the dispatch priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Id of the entity this operation targets
    pub fn entity_id(&self) -> EntityId {
        self.payload.id()
    }

    /// Entity type this operation targets
    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    /// Returns true when the op has exhausted its retry budget
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}

/// An operation that exhausted its retries, preserved for inspection
/// and manual replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub operation: SyncOperation,
    /// Display form of the final error that exhausted the op
    pub final_error: String,
    /// Stable label of the final error kind (e.g. "network", "server")
    pub error_kind: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(
        operation: SyncOperation,
        final_error: String,
        error_kind: String,
        dead_lettered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            operation,
            final_error,
            error_kind,
            dead_lettered_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{Card, SyncMeta};

    fn card_payload() -> EntityPayload {
        EntityPayload::Card(Card {
            id: EntityId::new(),
            title: "t".to_string(),
            body: "b".to_string(),
            folder_id: None,
            tag_ids: Vec::new(),
            meta: SyncMeta::new_local("2026-01-01T00:00:00Z".parse().unwrap()),
        })
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_new_operation_defaults() {
        let op = SyncOperation::new(
            OperationKind::Create,
            card_payload(),
            "2026-01-01T00:00:00Z".parse().unwrap(),
        );
        assert_eq!(op.priority, Priority::Normal);
        assert_eq!(op.sequence, 0);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.entity_type(), EntityType::Card);
    }

    #[test]
    fn test_with_priority() {
        let op = SyncOperation::new(
            OperationKind::Delete,
            card_payload(),
            "2026-01-01T00:00:00Z".parse().unwrap(),
        )
        .with_priority(Priority::High);
        assert_eq!(op.priority, Priority::High);
    }

    #[test]
    fn test_is_exhausted() {
        let mut op = SyncOperation::new(
            OperationKind::Update,
            card_payload(),
            "2026-01-01T00:00:00Z".parse().unwrap(),
        );
        assert!(!op.is_exhausted(3));
        op.retry_count = 3;
        assert!(op.is_exhausted(3));
    }

    #[test]
    fn test_operation_serde_roundtrip() {
        let op = SyncOperation::new(
            OperationKind::Update,
            card_payload(),
            "2026-01-01T00:00:00Z".parse().unwrap(),
        );
        let json = serde_json::to_string(&op).unwrap();
        let back: SyncOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
