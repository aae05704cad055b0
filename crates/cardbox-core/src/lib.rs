//! Cardbox Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Card`, `Folder`, `Tag`, `Image`, `SyncOperation`, `ConflictRecord`
//! - **Port definitions** - Traits for adapters: `ILocalStore`, `IRemoteBackend`,
//!   `IAuthProvider`, `INetworkMonitor`
//! - **Error taxonomy** - Retryable vs. terminal sync failures
//! - **Configuration** - Typed YAML configuration with defaults
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no external dependencies.
//! Ports define trait interfaces that adapter crates implement. The sync engine
//! crates orchestrate domain entities through port interfaces.

pub mod config;
pub mod domain;
pub mod logging;
pub mod ports;
