//! Cardbox Net - Network monitoring adapter
//!
//! Implements [`INetworkMonitor`] with a rolling reliability score over
//! recent sync cycles. Link state changes are fed in by the platform layer
//! via [`AdaptiveNetworkMonitor::set_link`]; the monitor derives the two
//! adaptive values the engine consumes: the sync interval and the batch
//! size.

pub mod monitor;

pub use monitor::AdaptiveNetworkMonitor;
