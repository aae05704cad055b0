//! Error taxonomy for the sync engine
//!
//! Two layers:
//! - [`DomainError`] covers invariant violations inside the domain itself
//!   (bad identifiers, malformed payloads).
//! - [`SyncError`] is the classification every push/pull failure is mapped
//!   into before the retry machinery sees it. Whether an error is retried
//!   is decided once, by [`SyncError::is_retryable`], not ad hoc at call
//!   sites.

use thiserror::Error;

use super::newtypes::{ConflictId, EntityId, OperationId};

/// Errors raised by domain entities and value types
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid entity payload: {0}")]
    InvalidPayload(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Classified failure of a sync operation
///
/// Every error coming back from the remote backend or the transport is
/// mapped into exactly one of these variants before retry logic runs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    /// Transport-level failure: timeout, DNS, connection reset. Always
    /// retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote returned a 5xx-class failure. Retryable: the request was
    /// well-formed, the server was not healthy.
    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// Remote rejected the request as malformed or unauthorized
    /// (4xx-class). Terminal: retrying the same request cannot succeed.
    #[error("Client error (status {status}): {message}")]
    Client { status: u16, message: String },

    /// The operation payload failed local validation before dispatch.
    /// Terminal.
    #[error("Validation failed for {entity_id}: {reason}")]
    Validation { entity_id: EntityId, reason: String },

    /// The entity is blocked behind a conflict awaiting manual resolution.
    /// Terminal until the conflict is resolved.
    #[error("Entity {entity_id} is blocked by unresolved conflict {conflict_id}")]
    UnresolvedConflict {
        entity_id: EntityId,
        conflict_id: ConflictId,
    },

    /// The durable queue refused the operation because it is at capacity
    /// and nothing was evictable.
    #[error("Operation queue is full (capacity {capacity})")]
    QueueOverflow { capacity: usize },

    /// The operation exhausted its retry budget and was dead-lettered.
    #[error("Operation {operation_id} moved to dead-letter log after {attempts} attempts")]
    DeadLettered {
        operation_id: OperationId,
        attempts: u32,
    },

    /// Failure in the local durable store. Retryable: usually a transient
    /// lock or I/O condition.
    #[error("Local store error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Returns true when the failure is transient and the operation should
    /// be requeued with backoff rather than dropped.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::Server { .. } => true,
            SyncError::Storage(_) => true,
            SyncError::Client { .. } => false,
            SyncError::Validation { .. } => false,
            SyncError::UnresolvedConflict { .. } => false,
            SyncError::QueueOverflow { .. } => false,
            SyncError::DeadLettered { .. } => false,
        }
    }

    /// Short stable label used in logs and batch error reports
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Network(_) => "network",
            SyncError::Server { .. } => "server",
            SyncError::Client { .. } => "client",
            SyncError::Validation { .. } => "validation",
            SyncError::UnresolvedConflict { .. } => "unresolved_conflict",
            SyncError::QueueOverflow { .. } => "queue_overflow",
            SyncError::DeadLettered { .. } => "dead_lettered",
            SyncError::Storage(_) => "storage",
        }
    }

    /// Maps an HTTP-style status code into the server/client split
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status >= 500 {
            SyncError::Server {
                status,
                message: message.into(),
            }
        } else {
            SyncError::Client {
                status,
                message: message.into(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_and_server_errors_are_retryable() {
        assert!(SyncError::Network("timeout".into()).is_retryable());
        assert!(SyncError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(SyncError::Storage("database is locked".into()).is_retryable());
    }

    #[test]
    fn test_client_and_validation_errors_are_terminal() {
        assert!(!SyncError::Client {
            status: 403,
            message: "forbidden".into()
        }
        .is_retryable());
        assert!(!SyncError::Validation {
            entity_id: EntityId::new(),
            reason: "empty title".into()
        }
        .is_retryable());
        assert!(!SyncError::UnresolvedConflict {
            entity_id: EntityId::new(),
            conflict_id: ConflictId::new(),
        }
        .is_retryable());
        assert!(!SyncError::QueueOverflow { capacity: 10 }.is_retryable());
    }

    #[test]
    fn test_from_status_splits_on_500() {
        assert!(matches!(
            SyncError::from_status(500, "boom"),
            SyncError::Server { status: 500, .. }
        ));
        assert!(matches!(
            SyncError::from_status(422, "bad"),
            SyncError::Client { status: 422, .. }
        ));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(SyncError::Network("x".into()).kind(), "network");
        assert_eq!(
            SyncError::QueueOverflow { capacity: 1 }.kind(),
            "queue_overflow"
        );
    }
}
