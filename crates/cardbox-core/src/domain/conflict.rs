//! Conflict records and resolution strategy vocabulary
//!
//! A [`ConflictRecord`] captures both divergent snapshots at detection time.
//! Once a record reaches `Resolved` it is immutable: re-resolving appends a
//! new record instead of mutating the old one, so the conflict log is an
//! audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{EntityPayload, EntityType};
use super::errors::DomainError;
use super::newtypes::{ConflictId, EntityId};

/// How the two sides diverged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed the record since the last successful sync
    ConcurrentModification,
    /// Structural mismatch, e.g. a record pointing at a parent that does
    /// not exist on one side
    DataInconsistency,
    /// A stale read surfaced by a retried request
    NetworkConflict,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::ConcurrentModification => write!(f, "concurrent_modification"),
            ConflictKind::DataInconsistency => write!(f, "data_inconsistency"),
            ConflictKind::NetworkConflict => write!(f, "network_conflict"),
        }
    }
}

/// How unsafe automatic resolution of a conflict would be
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Maps a severity score in `0.0..=1.0` onto a risk band
    pub fn from_severity(severity: f64) -> Self {
        if severity < 0.25 {
            RiskLevel::Low
        } else if severity < 0.5 {
            RiskLevel::Medium
        } else if severity < 0.75 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Selectable resolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Keep the local snapshot and push it
    AcceptLocal,
    /// Keep the remote snapshot and overwrite local
    AcceptRemote,
    /// Field-level merge: remote wins structure, local wins content,
    /// tag sets are unioned
    Merge,
    /// Preserve both versions as distinct records
    CreateNew,
    /// Take no automatic action; wait for an explicit choice
    Manual,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStrategy::AcceptLocal => write!(f, "accept_local"),
            ResolutionStrategy::AcceptRemote => write!(f, "accept_remote"),
            ResolutionStrategy::Merge => write!(f, "merge"),
            ResolutionStrategy::CreateNew => write!(f, "create_new"),
            ResolutionStrategy::Manual => write!(f, "manual"),
        }
    }
}

/// Lifecycle state of a conflict record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

/// One detected divergence between a local and a remote snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub kind: ConflictKind,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub local_snapshot: EntityPayload,
    pub remote_snapshot: EntityPayload,
    /// Heuristic divergence score in `0.0..=1.0`
    pub severity: f64,
    pub risk_level: RiskLevel,
    pub status: ConflictStatus,
    pub detected_at: DateTime<Utc>,
    /// Strategy that resolved this record, once `Resolved`
    pub resolution: Option<ResolutionStrategy>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    /// Builds a pending record from two divergent snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidPayload`] if the snapshots refer to
    /// different entities.
    pub fn detect(
        kind: ConflictKind,
        local_snapshot: EntityPayload,
        remote_snapshot: EntityPayload,
        severity: f64,
        detected_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if local_snapshot.id() != remote_snapshot.id()
            || local_snapshot.entity_type() != remote_snapshot.entity_type()
        {
            return Err(DomainError::InvalidPayload(format!(
                "conflict snapshots refer to different entities: {} vs {}",
                local_snapshot.id(),
                remote_snapshot.id()
            )));
        }
        let severity = severity.clamp(0.0, 1.0);
        Ok(Self {
            id: ConflictId::new(),
            kind,
            entity_type: local_snapshot.entity_type(),
            entity_id: local_snapshot.id(),
            local_snapshot,
            remote_snapshot,
            severity,
            risk_level: RiskLevel::from_severity(severity),
            status: ConflictStatus::Pending,
            detected_at,
            resolution: None,
            resolved_at: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }

    /// Marks the record resolved. Returns `None` when the record is already
    /// `Resolved` (resolved records are immutable; the caller appends a new
    /// record instead).
    #[must_use]
    pub fn into_resolved(
        self,
        strategy: ResolutionStrategy,
        resolved_at: DateTime<Utc>,
    ) -> Option<Self> {
        if self.status == ConflictStatus::Resolved {
            return None;
        }
        Some(Self {
            status: ConflictStatus::Resolved,
            resolution: Some(strategy),
            resolved_at: Some(resolved_at),
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{Card, SyncMeta};

    fn snapshot(id: EntityId, title: &str) -> EntityPayload {
        EntityPayload::Card(Card {
            id,
            title: title.to_string(),
            body: String::new(),
            folder_id: None,
            tag_ids: Vec::new(),
            meta: SyncMeta::new_local("2026-01-01T00:00:00Z".parse().unwrap()),
        })
    }

    #[test]
    fn test_risk_level_bands() {
        assert_eq!(RiskLevel::from_severity(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_severity(0.24), RiskLevel::Low);
        assert_eq!(RiskLevel::from_severity(0.25), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_severity(0.5), RiskLevel::High);
        assert_eq!(RiskLevel::from_severity(0.75), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_severity(1.0), RiskLevel::Critical);
    }

    #[test]
    fn test_detect_rejects_mismatched_entities() {
        let result = ConflictRecord::detect(
            ConflictKind::ConcurrentModification,
            snapshot(EntityId::new(), "a"),
            snapshot(EntityId::new(), "b"),
            0.5,
            "2026-01-02T00:00:00Z".parse().unwrap(),
        );
        assert!(matches!(result, Err(DomainError::InvalidPayload(_))));
    }

    #[test]
    fn test_detect_clamps_severity() {
        let id = EntityId::new();
        let record = ConflictRecord::detect(
            ConflictKind::ConcurrentModification,
            snapshot(id, "a"),
            snapshot(id, "b"),
            1.7,
            "2026-01-02T00:00:00Z".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(record.severity, 1.0);
        assert_eq!(record.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_into_resolved_is_one_shot() {
        let id = EntityId::new();
        let record = ConflictRecord::detect(
            ConflictKind::NetworkConflict,
            snapshot(id, "a"),
            snapshot(id, "b"),
            0.1,
            "2026-01-02T00:00:00Z".parse().unwrap(),
        )
        .unwrap();
        let resolved = record
            .into_resolved(
                ResolutionStrategy::AcceptRemote,
                "2026-01-03T00:00:00Z".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        assert_eq!(resolved.resolution, Some(ResolutionStrategy::AcceptRemote));

        // A resolved record cannot be resolved again.
        assert!(resolved
            .into_resolved(
                ResolutionStrategy::AcceptLocal,
                "2026-01-04T00:00:00Z".parse().unwrap(),
            )
            .is_none());
    }
}
