//! Conflict detection for the pull path
//!
//! The detection rule is deliberately narrow: a conflict exists only when
//! the remote side is newer AND the local side has an un-pushed change.
//! Every other combination has an unambiguous action:
//!
//! | condition                                  | outcome      |
//! |--------------------------------------------|--------------|
//! | remote newer, local pending                | conflict     |
//! | remote newer, local clean                  | apply remote |
//! | local newer, local pending                 | push local   |
//! | equal timestamps                           | in sync      |

use chrono::{DateTime, Utc};
use tracing::debug;

use cardbox_core::domain::{ConflictRecord, DomainError, EntityPayload};

use crate::classifier;

/// Outcome of comparing a local record against its remote counterpart
#[derive(Debug, Clone)]
pub enum Detection {
    /// Timestamps match, nothing to do
    InSync,
    /// Remote is newer and local has no pending change: overwrite local
    ApplyRemote,
    /// Local is newer and pending: enqueue a push, do not touch local
    PushLocal,
    /// Both sides changed concurrently
    Conflicted(ConflictRecord),
}

/// Stateless detector; construction exists to mirror the other engine
/// components and to leave room for per-type tuning later
#[derive(Debug, Default, Clone)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Compares one local/remote pair.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidPayload`] when the snapshots refer to
    /// different entities.
    pub fn detect(
        &self,
        local: &EntityPayload,
        remote: &EntityPayload,
        now: DateTime<Utc>,
    ) -> Result<Detection, DomainError> {
        if local.id() != remote.id() || local.entity_type() != remote.entity_type() {
            return Err(DomainError::InvalidPayload(format!(
                "cannot compare {} against {}",
                local.id(),
                remote.id()
            )));
        }

        let local_ts = local.meta().updated_at;
        let remote_ts = remote.meta().updated_at;
        let pending = local.meta().pending_sync;

        if remote_ts == local_ts {
            return Ok(Detection::InSync);
        }
        if remote_ts > local_ts {
            if !pending {
                return Ok(Detection::ApplyRemote);
            }
            let severity = classifier::severity(local, remote);
            let kind = classifier::classify(local, remote);
            let record =
                ConflictRecord::detect(kind, local.clone(), remote.clone(), severity, now)?;
            debug!(
                conflict_id = %record.id,
                entity_id = %record.entity_id,
                kind = %record.kind,
                severity = record.severity,
                "conflict detected"
            );
            return Ok(Detection::Conflicted(record));
        }
        // Local is newer.
        if pending {
            Ok(Detection::PushLocal)
        } else {
            Ok(Detection::InSync)
        }
    }
}
