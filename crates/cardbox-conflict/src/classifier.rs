//! Divergence scoring and conflict kind classification
//!
//! Severity is the weighted fraction of fields that diverge between the
//! two snapshots. Structural fields (titles, names, parent references,
//! the tombstone flag) weigh double content fields, because getting them
//! wrong breaks referential integrity rather than just losing an edit.

use cardbox_core::domain::{ConflictKind, EntityPayload};

const STRUCTURAL_WEIGHT: f64 = 2.0;
const CONTENT_WEIGHT: f64 = 1.0;

struct FieldDiff {
    weight: f64,
    diverged: bool,
}

fn field(weight: f64, diverged: bool) -> FieldDiff {
    FieldDiff { weight, diverged }
}

fn diff_fields(local: &EntityPayload, remote: &EntityPayload) -> Vec<FieldDiff> {
    let mut fields = vec![field(
        STRUCTURAL_WEIGHT,
        local.meta().is_deleted != remote.meta().is_deleted,
    )];
    match (local, remote) {
        (EntityPayload::Card(l), EntityPayload::Card(r)) => {
            fields.push(field(STRUCTURAL_WEIGHT, l.title != r.title));
            fields.push(field(STRUCTURAL_WEIGHT, l.folder_id != r.folder_id));
            fields.push(field(CONTENT_WEIGHT, l.body != r.body));
            fields.push(field(CONTENT_WEIGHT, l.tag_ids != r.tag_ids));
        }
        (EntityPayload::Folder(l), EntityPayload::Folder(r)) => {
            fields.push(field(STRUCTURAL_WEIGHT, l.name != r.name));
            fields.push(field(STRUCTURAL_WEIGHT, l.parent_id != r.parent_id));
        }
        (EntityPayload::Tag(l), EntityPayload::Tag(r)) => {
            fields.push(field(STRUCTURAL_WEIGHT, l.name != r.name));
            fields.push(field(CONTENT_WEIGHT, l.color != r.color));
        }
        (EntityPayload::Image(l), EntityPayload::Image(r)) => {
            fields.push(field(STRUCTURAL_WEIGHT, l.card_id != r.card_id));
            fields.push(field(STRUCTURAL_WEIGHT, l.file_name != r.file_name));
            fields.push(field(CONTENT_WEIGHT, l.mime_type != r.mime_type));
            fields.push(field(CONTENT_WEIGHT, l.blob_ref != r.blob_ref));
        }
        // Mismatched variants are caught upstream by ConflictRecord::detect.
        _ => {}
    }
    fields
}

/// Weighted fraction of diverging fields, in `0.0..=1.0`
pub fn severity(local: &EntityPayload, remote: &EntityPayload) -> f64 {
    let fields = diff_fields(local, remote);
    let total: f64 = fields.iter().map(|f| f.weight).sum();
    if total == 0.0 {
        return 0.0;
    }
    let diverged: f64 = fields
        .iter()
        .filter(|f| f.diverged)
        .map(|f| f.weight)
        .sum();
    diverged / total
}

/// Picks the conflict kind for a concurrent-edit pair.
///
/// - Diverging structure (tombstone or parent reference) is a
///   `DataInconsistency`.
/// - Same sync version and identical content means a retried push came
///   back with a later server clock and nothing else: `NetworkConflict`.
/// - Everything else, equal versions included, is a plain
///   `ConcurrentModification`: two edits from a common ancestor carry the
///   same version on both sides.
pub fn classify(local: &EntityPayload, remote: &EntityPayload) -> ConflictKind {
    let tombstone_divergence = local.meta().is_deleted != remote.meta().is_deleted;
    let parent_divergence = local.parent_ref() != remote.parent_ref();

    if tombstone_divergence || parent_divergence {
        ConflictKind::DataInconsistency
    } else if local.meta().sync_version == remote.meta().sync_version
        && local.same_content(remote)
    {
        ConflictKind::NetworkConflict
    } else {
        ConflictKind::ConcurrentModification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardbox_core::domain::{Card, EntityId, Folder, SyncMeta};

    fn meta(version: u64) -> SyncMeta {
        SyncMeta {
            sync_version: version,
            pending_sync: false,
            updated_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            is_deleted: false,
        }
    }

    fn card(id: EntityId, title: &str, body: &str, version: u64) -> EntityPayload {
        EntityPayload::Card(Card {
            id,
            title: title.to_string(),
            body: body.to_string(),
            folder_id: None,
            tag_ids: Vec::new(),
            meta: meta(version),
        })
    }

    #[test]
    fn test_identical_snapshots_score_zero() {
        let id = EntityId::new();
        assert_eq!(severity(&card(id, "a", "b", 1), &card(id, "a", "b", 1)), 0.0);
    }

    #[test]
    fn test_content_divergence_scores_low() {
        let id = EntityId::new();
        let local = card(id, "a", "local body", 2);
        let remote = card(id, "a", "remote body", 3);
        // Card weights: tombstone 2 + title 2 + folder 2 + body 1 + tags 1 = 8.
        // Only body (1) diverges.
        assert!((severity(&local, &remote) - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_structural_divergence_scores_higher() {
        let id = EntityId::new();
        let local = card(id, "local title", "same", 2);
        let remote = card(id, "remote title", "same", 3);
        let structural = severity(&local, &remote);
        let content = severity(&card(id, "same", "x", 2), &card(id, "same", "y", 3));
        assert!(structural > content);
    }

    #[test]
    fn test_tombstone_divergence_is_data_inconsistency() {
        let id = EntityId::new();
        let local = card(id, "a", "b", 2);
        let mut remote = card(id, "a", "b", 3);
        remote.meta_mut().is_deleted = true;
        assert_eq!(classify(&local, &remote), ConflictKind::DataInconsistency);
    }

    #[test]
    fn test_parent_divergence_is_data_inconsistency() {
        let id = EntityId::new();
        let make = |parent| {
            EntityPayload::Folder(Folder {
                id,
                name: "f".to_string(),
                parent_id: parent,
                meta: meta(2),
            })
        };
        assert_eq!(
            classify(&make(None), &make(Some(EntityId::new()))),
            ConflictKind::DataInconsistency
        );
    }

    #[test]
    fn test_stale_retry_echo_is_network_conflict() {
        let id = EntityId::new();
        let local = card(id, "a", "same body", 4);
        let remote = card(id, "a", "same body", 4);
        assert_eq!(classify(&local, &remote), ConflictKind::NetworkConflict);
    }

    #[test]
    fn test_same_version_divergent_content_is_concurrent_modification() {
        // Two edits from a common ancestor: both sides still carry the
        // ancestor's version, but the content disagrees.
        let id = EntityId::new();
        let local = card(id, "a", "local", 4);
        let remote = card(id, "a", "remote", 4);
        assert_eq!(
            classify(&local, &remote),
            ConflictKind::ConcurrentModification
        );
    }

    #[test]
    fn test_default_kind_is_concurrent_modification() {
        let id = EntityId::new();
        let local = card(id, "a", "local", 2);
        let remote = card(id, "a", "remote", 5);
        assert_eq!(
            classify(&local, &remote),
            ConflictKind::ConcurrentModification
        );
    }
}
