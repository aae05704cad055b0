//! Cardbox Engine - Sync orchestration
//!
//! Ties the queue, the conflict machinery, and the port adapters together:
//!
//! - [`BatchDispatcher`] - drains the queue in adaptively-sized groups with
//!   bounded concurrency (the push path)
//! - [`SyncOrchestrator`] - the Idle → PullPhase → PushPhase state machine,
//!   single-flight guarded, exposed to the UI layer
//! - [`SyncScheduler`] - periodic driver re-invoking sync at the
//!   network-derived adaptive interval
//! - [`StatusNotifier`] - pub/sub broadcaster of status, conflict, and
//!   progress events
//! - [`HealthTracker`] - derived healthy/warning/critical indicator

pub mod dispatcher;
pub mod health;
pub mod notifier;
pub mod orchestrator;
pub mod scheduler;

pub use dispatcher::BatchDispatcher;
pub use health::HealthTracker;
pub use notifier::{StatusNotifier, Subscription};
pub use orchestrator::{SkipReason, SyncOrchestrator, SyncOutcome, SyncReport};
pub use scheduler::SyncScheduler;
