//! Cardbox Queue - Durable priority operation queue
//!
//! The queue is the only path from a local mutation to the network. It
//! orders operations by priority (Critical > High > Normal > Low) with FIFO
//! inside a priority band, persists every mutation so a restart replays
//! exactly the un-acknowledged set, and moves operations that exhaust their
//! retry budget to a dead-letter log instead of dropping them.

pub mod backoff;
pub mod queue;

pub use backoff::retry_delay;
pub use queue::{EnqueueOutcome, OperationQueue, RequeueOutcome};
