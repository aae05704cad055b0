//! Cardbox Store - Local persistence adapters
//!
//! Implements the `ILocalStore` port from `cardbox-core`. Two adapters:
//!
//! - [`SqliteLocalStore`] - the production adapter: one durable table per
//!   entity type plus the queue, dead-letter, and conflict-log tables, all
//!   keyed by UUID
//! - [`MemoryLocalStore`] - an in-process adapter for tests and ephemeral
//!   sessions, with the same semantics
//!
//! Both are driven (secondary) adapters in the hexagonal architecture.

pub mod memory;
pub mod repository;

pub use memory::MemoryLocalStore;
pub use repository::SqliteLocalStore;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
