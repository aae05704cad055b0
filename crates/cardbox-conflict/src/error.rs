//! Conflict-specific errors

use thiserror::Error;

use cardbox_core::domain::{ConflictId, DomainError};

#[derive(Debug, Error)]
pub enum ConflictError {
    /// The two snapshots cannot be compared or merged (different entities
    /// or different entity types)
    #[error("Snapshots are incompatible: {0}")]
    IncompatibleSnapshots(String),

    /// The referenced conflict does not exist
    #[error("Conflict {0} not found")]
    NotFound(ConflictId),

    /// The conflict was already resolved; resolved records are immutable
    #[error("Conflict {0} is already resolved")]
    AlreadyResolved(ConflictId),

    #[error(transparent)]
    Domain(#[from] DomainError),
}
