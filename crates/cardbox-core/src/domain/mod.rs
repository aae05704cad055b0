//! Domain entities and value types for the Cardbox sync engine.

pub mod conflict;
pub mod entity;
pub mod errors;
pub mod newtypes;
pub mod operation;
pub mod status;

pub use conflict::{ConflictKind, ConflictRecord, ConflictStatus, ResolutionStrategy, RiskLevel};
pub use entity::{Card, EntityPayload, EntityType, Folder, Image, SyncMeta, Tag};
pub use errors::{DomainError, SyncError};
pub use newtypes::{BatchId, ConflictId, EntityId, OperationId, UserId};
pub use operation::{DeadLetterEntry, OperationKind, Priority, SyncOperation};
pub use status::{BatchError, BatchResult, SyncHealth, SyncPhase, SyncProgress, SyncStatus};
