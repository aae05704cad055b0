//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync engine
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ILocalStore`] - Durable local replica: entity tables, queue table,
//!   dead-letter log, conflict log
//! - [`IRemoteBackend`] - Remote store contract: upsert-by-id, soft-delete,
//!   timestamp-filterable read
//! - [`IAuthProvider`] - Current user identity and auth state transitions
//! - [`INetworkMonitor`] - Connectivity state, quality tiers, and the two
//!   adaptive values derived from them

pub mod auth_provider;
pub mod local_store;
pub mod network_monitor;
pub mod remote_backend;

pub use auth_provider::{AuthState, IAuthProvider};
pub use local_store::{ILocalStore, RecordFilter};
pub use network_monitor::{INetworkMonitor, NetworkState, QualityTier};
pub use remote_backend::IRemoteBackend;
