//! Local store port (driven/secondary port)
//!
//! This module defines the interface for the durable local replica: one
//! table per entity type, the persisted operation queue, the dead-letter
//! log, and the conflict log.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, in-memory, etc.) and don't need domain-level classification;
//!   the engine wraps them into `SyncError::Storage` at the boundary.
//! - The `RecordFilter` struct provides a composable query mechanism
//!   without exposing storage implementation details.
//! - Queue and entity mutations that belong together (e.g. ack + clear
//!   `pending_sync`) are separate calls; implementations must make each
//!   individual call atomic so a crash never leaves a partial write.

use chrono::{DateTime, Utc};

use crate::domain::{
    ConflictId, ConflictRecord, DeadLetterEntry, EntityId, EntityPayload, EntityType, OperationId,
    SyncOperation,
};

/// Filter criteria for querying entity records
///
/// All fields are optional; when `None`, no filtering is applied for that
/// field. Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Only records with a pending local change
    pub pending_sync: Option<bool>,
    /// Only records modified after this timestamp
    pub updated_since: Option<DateTime<Utc>>,
    /// Whether soft-deleted records are included (default: excluded)
    pub include_deleted: bool,
}

impl RecordFilter {
    /// Creates a new empty filter (matches all live records)
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pending-sync filter
    pub fn with_pending_sync(mut self, pending: bool) -> Self {
        self.pending_sync = Some(pending);
        self
    }

    /// Sets the modified-since filter
    pub fn with_updated_since(mut self, since: DateTime<Utc>) -> Self {
        self.updated_since = Some(since);
        self
    }

    /// Includes soft-deleted records in the result
    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

/// Port trait for the durable local replica
///
/// ## Implementation Notes
///
/// - `put` is an upsert: an existing record with the same id is replaced.
/// - `load_queue` returns the full un-acknowledged set in `(priority desc,
///   sequence asc)` order so a restart replays the queue exactly.
/// - Dead-letter and conflict-log entries are append-mostly; removal only
///   happens on explicit replay or pruning.
#[async_trait::async_trait]
pub trait ILocalStore: Send + Sync {
    // --- Entity operations ---

    /// Saves an entity record (insert or update)
    async fn put(&self, payload: &EntityPayload) -> anyhow::Result<()>;

    /// Saves several entity records of one type in a single transaction
    async fn bulk_put(&self, payloads: &[EntityPayload]) -> anyhow::Result<()>;

    /// Retrieves an entity record by type and id
    async fn get(
        &self,
        entity_type: EntityType,
        id: &EntityId,
    ) -> anyhow::Result<Option<EntityPayload>>;

    /// Queries entity records of one type matching the filter
    async fn query(
        &self,
        entity_type: EntityType,
        filter: &RecordFilter,
    ) -> anyhow::Result<Vec<EntityPayload>>;

    /// Hard-deletes an entity record. Soft deletion goes through `put`
    /// with the tombstone flag set; this is for post-sync pruning.
    async fn delete(&self, entity_type: EntityType, id: &EntityId) -> anyhow::Result<()>;

    /// Counts live records of one type
    async fn count(&self, entity_type: EntityType) -> anyhow::Result<u64>;

    // --- Queue operations ---

    /// Persists a queued operation (insert or update after requeue)
    async fn save_queued_op(&self, op: &SyncOperation) -> anyhow::Result<()>;

    /// Removes an acknowledged or dead-lettered operation from the queue
    /// table. Removing an id that is not present is a no-op.
    async fn remove_queued_op(&self, id: &OperationId) -> anyhow::Result<()>;

    /// Loads the full un-acknowledged operation set, ordered by priority
    /// (descending) then sequence (ascending)
    async fn load_queue(&self) -> anyhow::Result<Vec<SyncOperation>>;

    // --- Dead-letter operations ---

    /// Appends an exhausted operation to the dead-letter log
    async fn save_dead_letter(&self, entry: &DeadLetterEntry) -> anyhow::Result<()>;

    /// Loads the dead-letter log, newest first
    async fn load_dead_letters(&self) -> anyhow::Result<Vec<DeadLetterEntry>>;

    /// Removes a dead-letter entry (after manual replay or pruning)
    async fn remove_dead_letter(&self, id: &OperationId) -> anyhow::Result<()>;

    // --- Conflict log operations ---

    /// Appends a conflict record. Records are immutable once resolved, so
    /// re-resolution appends rather than updates.
    async fn save_conflict(&self, record: &ConflictRecord) -> anyhow::Result<()>;

    /// Retrieves a conflict record by id
    async fn get_conflict(&self, id: &ConflictId) -> anyhow::Result<Option<ConflictRecord>>;

    /// Retrieves all pending conflicts, newest first
    async fn pending_conflicts(&self) -> anyhow::Result<Vec<ConflictRecord>>;
}
