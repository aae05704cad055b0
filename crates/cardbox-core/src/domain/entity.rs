//! Entity records synchronized between the local replica and the remote store
//!
//! Every record carries a [`SyncMeta`] block with the two fields the sync
//! engine owns (`sync_version`, `pending_sync`) plus the modification
//! timestamp and soft-delete flag shared with the remote contract.
//!
//! ## Write rules
//!
//! - `sync_version` strictly increases on every accepted write, local or
//!   merged-from-remote. A write that does not increase the version is
//!   treated as already synchronized and ignored.
//! - `pending_sync` is set when a local change has not yet been acknowledged
//!   remotely, and cleared exactly when the push is acknowledged.
//! - Deletion is soft: `is_deleted` flips to true and the record syncs like
//!   any other write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::newtypes::EntityId;

/// The four record types Cardbox synchronizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Card,
    Folder,
    Tag,
    Image,
}

impl EntityType {
    /// All entity types, in the order sync cycles process them.
    ///
    /// Folders first so that parent references resolve before cards,
    /// tags before cards for the same reason, images last.
    pub const ALL: [EntityType; 4] = [
        EntityType::Folder,
        EntityType::Tag,
        EntityType::Card,
        EntityType::Image,
    ];

    /// Durable table name for this entity type
    pub fn table(&self) -> &'static str {
        match self {
            EntityType::Card => "cards",
            EntityType::Folder => "folders",
            EntityType::Tag => "tags",
            EntityType::Image => "images",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Card => write!(f, "card"),
            EntityType::Folder => write!(f, "folder"),
            EntityType::Tag => write!(f, "tag"),
            EntityType::Image => write!(f, "image"),
        }
    }
}

/// Synchronization bookkeeping shared by every entity record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Monotonic counter incremented on every accepted write
    pub sync_version: u64,
    /// True while a local change has not been acknowledged remotely
    pub pending_sync: bool,
    /// Last modification time (local clock for local edits, remote clock
    /// for pulled records)
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker; deleted records still sync
    pub is_deleted: bool,
}

impl SyncMeta {
    /// Metadata for a brand-new local record: version 1, pending push
    pub fn new_local(updated_at: DateTime<Utc>) -> Self {
        Self {
            sync_version: 1,
            pending_sync: true,
            updated_at,
            is_deleted: false,
        }
    }

    /// Records a locally accepted write: bumps the version, marks pending
    pub fn record_local_write(&mut self, at: DateTime<Utc>) {
        self.sync_version += 1;
        self.pending_sync = true;
        self.updated_at = at;
    }

    /// Records an accepted remote write: bumps the version, clears pending
    pub fn record_remote_write(&mut self, at: DateTime<Utc>) {
        self.sync_version += 1;
        self.pending_sync = false;
        self.updated_at = at;
    }

    /// Marks the pending local change as acknowledged by the remote
    pub fn acknowledge(&mut self) {
        self.pending_sync = false;
    }

    /// Returns true if a write carrying `version` would be a no-op
    /// (the version does not advance past the current one)
    pub fn is_stale_write(&self, version: u64) -> bool {
        version <= self.sync_version
    }
}

/// A note card: the primary record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: EntityId,
    /// Short title shown in lists (structural field: remote wins on merge)
    pub title: String,
    /// Free-form body text (content field: local wins on merge)
    pub body: String,
    /// Containing folder, if any (structural field)
    pub folder_id: Option<EntityId>,
    /// Attached tags; merged by union, never overwritten
    pub tag_ids: Vec<EntityId>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

/// A folder grouping cards, optionally nested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: EntityId,
    pub name: String,
    pub parent_id: Option<EntityId>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

/// A label attachable to cards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: EntityId,
    pub name: String,
    /// Display color as a CSS hex string, if the user picked one
    pub color: Option<String>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

/// An image attachment referencing uploaded blob content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: EntityId,
    /// Card this image is attached to, if any
    pub card_id: Option<EntityId>,
    pub file_name: String,
    pub mime_type: String,
    /// Opaque key of the uploaded blob; the blob pipeline is outside the
    /// sync engine, only the reference is synchronized
    pub blob_ref: String,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

/// Tagged union of all synchronized record types
///
/// Dispatcher and resolver match on this enum, so the compiler enforces
/// exhaustive handling when a new entity type is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum EntityPayload {
    Card(Card),
    Folder(Folder),
    Tag(Tag),
    Image(Image),
}

impl EntityPayload {
    /// Returns the record's entity type
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityPayload::Card(_) => EntityType::Card,
            EntityPayload::Folder(_) => EntityType::Folder,
            EntityPayload::Tag(_) => EntityType::Tag,
            EntityPayload::Image(_) => EntityType::Image,
        }
    }

    /// Returns the record's id
    pub fn id(&self) -> EntityId {
        match self {
            EntityPayload::Card(c) => c.id,
            EntityPayload::Folder(f) => f.id,
            EntityPayload::Tag(t) => t.id,
            EntityPayload::Image(i) => i.id,
        }
    }

    /// Returns the sync metadata block
    pub fn meta(&self) -> &SyncMeta {
        match self {
            EntityPayload::Card(c) => &c.meta,
            EntityPayload::Folder(f) => &f.meta,
            EntityPayload::Tag(t) => &t.meta,
            EntityPayload::Image(i) => &i.meta,
        }
    }

    /// Returns the sync metadata block mutably
    pub fn meta_mut(&mut self) -> &mut SyncMeta {
        match self {
            EntityPayload::Card(c) => &mut c.meta,
            EntityPayload::Folder(f) => &mut f.meta,
            EntityPayload::Tag(t) => &mut t.meta,
            EntityPayload::Image(i) => &mut i.meta,
        }
    }

    /// Parent reference, when the entity type has one
    ///
    /// Used by conflict classification to detect structural inconsistency
    /// (a record pointing at a folder that does not exist).
    pub fn parent_ref(&self) -> Option<EntityId> {
        match self {
            EntityPayload::Card(c) => c.folder_id,
            EntityPayload::Folder(f) => f.parent_id,
            EntityPayload::Tag(_) => None,
            EntityPayload::Image(i) => i.card_id,
        }
    }

    /// True when every user-visible field matches, tombstone state
    /// included, ignoring the rest of the sync bookkeeping.
    ///
    /// A record echoed back by a retried push compares equal here even
    /// though its timestamp and pending flag moved.
    pub fn same_content(&self, other: &EntityPayload) -> bool {
        if self.meta().is_deleted != other.meta().is_deleted {
            return false;
        }
        match (self, other) {
            (EntityPayload::Card(l), EntityPayload::Card(r)) => {
                l.title == r.title
                    && l.body == r.body
                    && l.folder_id == r.folder_id
                    && l.tag_ids == r.tag_ids
            }
            (EntityPayload::Folder(l), EntityPayload::Folder(r)) => {
                l.name == r.name && l.parent_id == r.parent_id
            }
            (EntityPayload::Tag(l), EntityPayload::Tag(r)) => {
                l.name == r.name && l.color == r.color
            }
            (EntityPayload::Image(l), EntityPayload::Image(r)) => {
                l.card_id == r.card_id
                    && l.file_name == r.file_name
                    && l.mime_type == r.mime_type
                    && l.blob_ref == r.blob_ref
            }
            _ => false,
        }
    }

    /// Rewrites the record id. Used when conflict resolution duplicates a
    /// record under a freshly derived id.
    pub fn set_id(&mut self, id: EntityId) {
        match self {
            EntityPayload::Card(c) => c.id = id,
            EntityPayload::Folder(f) => f.id = id,
            EntityPayload::Tag(t) => t.id = id,
            EntityPayload::Image(i) => i.id = id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_at(version: u64, ts: &str) -> SyncMeta {
        SyncMeta {
            sync_version: version,
            pending_sync: false,
            updated_at: ts.parse().unwrap(),
            is_deleted: false,
        }
    }

    fn sample_card() -> Card {
        Card {
            id: EntityId::new(),
            title: "Groceries".to_string(),
            body: "milk, eggs".to_string(),
            folder_id: None,
            tag_ids: Vec::new(),
            meta: meta_at(1, "2026-01-01T00:00:00Z"),
        }
    }

    #[test]
    fn test_record_local_write_bumps_version_and_marks_pending() {
        let mut meta = meta_at(3, "2026-01-01T00:00:00Z");
        meta.record_local_write("2026-01-02T00:00:00Z".parse().unwrap());
        assert_eq!(meta.sync_version, 4);
        assert!(meta.pending_sync);
    }

    #[test]
    fn test_record_remote_write_clears_pending() {
        let mut meta = meta_at(3, "2026-01-01T00:00:00Z");
        meta.pending_sync = true;
        meta.record_remote_write("2026-01-02T00:00:00Z".parse().unwrap());
        assert_eq!(meta.sync_version, 4);
        assert!(!meta.pending_sync);
    }

    #[test]
    fn test_is_stale_write() {
        let meta = meta_at(5, "2026-01-01T00:00:00Z");
        assert!(meta.is_stale_write(5));
        assert!(meta.is_stale_write(4));
        assert!(!meta.is_stale_write(6));
    }

    #[test]
    fn test_same_content_ignores_sync_bookkeeping() {
        let card = sample_card();
        let mut echoed = card.clone();
        echoed.meta = meta_at(2, "2026-01-03T00:00:00Z");
        echoed.meta.pending_sync = true;
        assert!(EntityPayload::Card(card).same_content(&EntityPayload::Card(echoed)));
    }

    #[test]
    fn test_same_content_sees_field_and_tombstone_changes() {
        let card = sample_card();
        let mut edited = card.clone();
        edited.body = "milk, eggs, flour".to_string();
        assert!(!EntityPayload::Card(card.clone()).same_content(&EntityPayload::Card(edited)));

        let mut deleted = card.clone();
        deleted.meta.is_deleted = true;
        assert!(!EntityPayload::Card(card).same_content(&EntityPayload::Card(deleted)));
    }

    #[test]
    fn test_payload_accessors() {
        let card = sample_card();
        let id = card.id;
        let payload = EntityPayload::Card(card);
        assert_eq!(payload.entity_type(), EntityType::Card);
        assert_eq!(payload.id(), id);
        assert_eq!(payload.meta().sync_version, 1);
        assert!(payload.parent_ref().is_none());
    }

    #[test]
    fn test_parent_ref_for_nested_folder() {
        let parent = EntityId::new();
        let folder = Folder {
            id: EntityId::new(),
            name: "Work".to_string(),
            parent_id: Some(parent),
            meta: meta_at(1, "2026-01-01T00:00:00Z"),
        };
        assert_eq!(EntityPayload::Folder(folder).parent_ref(), Some(parent));
    }

    #[test]
    fn test_payload_serde_tagging() {
        let payload = EntityPayload::Card(sample_card());
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"entity_type\":\"card\""));
        let back: EntityPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, back);
    }

    #[test]
    fn test_entity_type_processing_order() {
        // Folders and tags must come before cards so references resolve.
        let pos = |t: EntityType| EntityType::ALL.iter().position(|x| *x == t).unwrap();
        assert!(pos(EntityType::Folder) < pos(EntityType::Card));
        assert!(pos(EntityType::Tag) < pos(EntityType::Card));
    }

    #[test]
    fn test_set_id_rewrites_card_id() {
        let mut payload = EntityPayload::Card(sample_card());
        let new_id = EntityId::new();
        payload.set_id(new_id);
        assert_eq!(payload.id(), new_id);
    }
}
