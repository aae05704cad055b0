//! Remote backend port (driven/secondary port)
//!
//! The contract the sync engine expects from the remote store: upsert by
//! id, soft-delete, and a timestamp-filterable read. Nothing else is
//! assumed; in particular there is no remote transaction primitive, so
//! batch atomicity comes from per-record idempotence (an upsert replayed
//! after a crash converges to the same state).
//!
//! ## Design Notes
//!
//! Unlike the local store port, methods return `Result<_, SyncError>`:
//! the dispatcher needs the retryable/terminal classification at the call
//! site, so adapters map their transport errors into the taxonomy instead
//! of the engine guessing from error strings.

use chrono::{DateTime, Utc};

use crate::domain::{EntityId, EntityPayload, EntityType, SyncError};

/// Port trait for the remote store
#[async_trait::async_trait]
pub trait IRemoteBackend: Send + Sync {
    /// Creates or replaces a record by id.
    ///
    /// Idempotent: replaying the same payload is harmless. Returns the
    /// record as the remote now stores it (the remote may stamp its own
    /// `updated_at`).
    async fn upsert(&self, payload: &EntityPayload) -> Result<EntityPayload, SyncError>;

    /// Soft-deletes a record by id. Deleting an already-deleted or unknown
    /// record succeeds (tombstones converge).
    async fn soft_delete(&self, entity_type: EntityType, id: &EntityId)
        -> Result<(), SyncError>;

    /// Reads all records of one type modified after `updated_since`
    /// (all records when `None`). Includes tombstones.
    async fn select(
        &self,
        entity_type: EntityType,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EntityPayload>, SyncError>;
}
