//! Cardbox Conflict - Detection, classification, and resolution
//!
//! The pull path runs every remote record through [`ConflictDetector`].
//! Most records are not conflicts: they are plain pulls, pending pushes, or
//! already in sync. When both sides changed concurrently, the detector
//! produces a [`ConflictRecord`](cardbox_core::domain::ConflictRecord) with
//! a severity score from the [`classifier`], the [`PolicyEngine`] picks a
//! strategy, and [`resolver::resolve`] turns the pair of snapshots into an
//! outcome.
//!
//! Resolution is a pure function of `(local, remote, strategy)`: identical
//! inputs always produce identical output.

pub mod classifier;
pub mod detector;
pub mod error;
pub mod policy;
pub mod resolver;

pub use detector::{ConflictDetector, Detection};
pub use error::ConflictError;
pub use policy::{PolicyEngine, PolicyRule};
pub use resolver::{resolve, ResolvedOutcome};
