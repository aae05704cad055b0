//! Pure conflict resolution
//!
//! [`resolve`] maps `(local, remote, strategy)` to an outcome without
//! consulting clocks, randomness, or any other ambient state. Identical
//! inputs always produce identical output; the duplicate id minted by
//! `CreateNew` is derived deterministically from the conflicted entity id.

use cardbox_core::domain::{EntityPayload, ResolutionStrategy, SyncMeta};

use crate::error::ConflictError;

/// Discriminator for ids minted by `CreateNew`
const DUPLICATE_DISCRIMINATOR: &[u8] = b"conflict-copy";

/// What resolution decided
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedOutcome {
    /// One snapshot survives; write it locally (and push it when its
    /// `pending_sync` is set)
    Keep(EntityPayload),
    /// Both versions survive: `canonical` keeps the original id, the
    /// losing side continues as `duplicate` under a derived id
    KeepBoth {
        canonical: EntityPayload,
        duplicate: EntityPayload,
    },
    /// No automatic action; the caller surfaces the conflict and waits
    Manual,
}

/// Resolves a conflicted local/remote pair with the given strategy.
///
/// # Errors
///
/// Returns [`ConflictError::IncompatibleSnapshots`] when the snapshots do
/// not refer to the same entity.
pub fn resolve(
    local: &EntityPayload,
    remote: &EntityPayload,
    strategy: ResolutionStrategy,
) -> Result<ResolvedOutcome, ConflictError> {
    if local.id() != remote.id() || local.entity_type() != remote.entity_type() {
        return Err(ConflictError::IncompatibleSnapshots(format!(
            "{} vs {}",
            local.id(),
            remote.id()
        )));
    }

    match strategy {
        ResolutionStrategy::AcceptLocal => {
            let mut kept = local.clone();
            // The surviving local version still has to reach the remote.
            kept.meta_mut().pending_sync = true;
            Ok(ResolvedOutcome::Keep(kept))
        }
        ResolutionStrategy::AcceptRemote => {
            let mut kept = remote.clone();
            kept.meta_mut().pending_sync = false;
            Ok(ResolvedOutcome::Keep(kept))
        }
        ResolutionStrategy::Merge => Ok(ResolvedOutcome::Keep(merge(local, remote))),
        ResolutionStrategy::CreateNew => {
            let mut canonical = remote.clone();
            canonical.meta_mut().pending_sync = false;

            let mut duplicate = local.clone();
            duplicate.set_id(local.id().derive(DUPLICATE_DISCRIMINATOR));
            let merged_meta = merged_meta(local.meta(), remote.meta());
            *duplicate.meta_mut() = SyncMeta {
                pending_sync: true,
                ..merged_meta
            };
            Ok(ResolvedOutcome::KeepBoth {
                canonical,
                duplicate,
            })
        }
        ResolutionStrategy::Manual => Ok(ResolvedOutcome::Manual),
    }
}

/// Field-level merge: remote wins structure (titles, names, parent
/// references, tombstone), local wins content (bodies, colors, blob
/// references), tag sets are unioned.
fn merge(local: &EntityPayload, remote: &EntityPayload) -> EntityPayload {
    let meta = merged_meta(local.meta(), remote.meta());
    match (local, remote) {
        (EntityPayload::Card(l), EntityPayload::Card(r)) => {
            let mut tag_ids = l.tag_ids.clone();
            for tag in &r.tag_ids {
                if !tag_ids.contains(tag) {
                    tag_ids.push(*tag);
                }
            }
            EntityPayload::Card(cardbox_core::domain::Card {
                id: r.id,
                title: r.title.clone(),
                body: l.body.clone(),
                folder_id: r.folder_id,
                tag_ids,
                meta,
            })
        }
        (EntityPayload::Folder(_), EntityPayload::Folder(r)) => {
            EntityPayload::Folder(cardbox_core::domain::Folder {
                id: r.id,
                name: r.name.clone(),
                parent_id: r.parent_id,
                meta,
            })
        }
        (EntityPayload::Tag(l), EntityPayload::Tag(r)) => {
            EntityPayload::Tag(cardbox_core::domain::Tag {
                id: r.id,
                name: r.name.clone(),
                color: l.color.clone(),
                meta,
            })
        }
        (EntityPayload::Image(l), EntityPayload::Image(r)) => {
            EntityPayload::Image(cardbox_core::domain::Image {
                id: r.id,
                card_id: r.card_id,
                file_name: r.file_name.clone(),
                mime_type: r.mime_type.clone(),
                blob_ref: l.blob_ref.clone(),
                meta,
            })
        }
        // Unreachable: entity types were checked by the caller.
        _ => remote.clone(),
    }
}

/// Metadata of a merge result: version advances past both inputs, the
/// timestamp is the later of the two, the tombstone follows the remote,
/// and the result is pending (it must be pushed).
fn merged_meta(local: &SyncMeta, remote: &SyncMeta) -> SyncMeta {
    SyncMeta {
        sync_version: local.sync_version.max(remote.sync_version) + 1,
        pending_sync: true,
        updated_at: local.updated_at.max(remote.updated_at),
        is_deleted: remote.is_deleted,
    }
}
