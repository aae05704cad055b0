//! In-memory implementation of ILocalStore
//!
//! Same semantics as the SQLite adapter without the disk. Used by the
//! engine tests and available for ephemeral sessions. All state lives
//! behind one async mutex; the store is cheap enough that finer locking
//! is not worth it.

use std::collections::HashMap;

use tokio::sync::Mutex;

use cardbox_core::domain::{
    ConflictId, ConflictRecord, ConflictStatus, DeadLetterEntry, EntityId, EntityPayload,
    EntityType, OperationId, SyncOperation,
};
use cardbox_core::ports::{ILocalStore, RecordFilter};

#[derive(Default)]
struct State {
    entities: HashMap<(EntityType, EntityId), EntityPayload>,
    queue: HashMap<OperationId, SyncOperation>,
    dead_letters: Vec<DeadLetterEntry>,
    conflicts: HashMap<ConflictId, ConflictRecord>,
}

/// In-memory local store
#[derive(Default)]
pub struct MemoryLocalStore {
    state: Mutex<State>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ILocalStore for MemoryLocalStore {
    async fn put(&self, payload: &EntityPayload) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state
            .entities
            .insert((payload.entity_type(), payload.id()), payload.clone());
        Ok(())
    }

    async fn bulk_put(&self, payloads: &[EntityPayload]) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        for payload in payloads {
            state
                .entities
                .insert((payload.entity_type(), payload.id()), payload.clone());
        }
        Ok(())
    }

    async fn get(
        &self,
        entity_type: EntityType,
        id: &EntityId,
    ) -> anyhow::Result<Option<EntityPayload>> {
        let state = self.state.lock().await;
        Ok(state.entities.get(&(entity_type, *id)).cloned())
    }

    async fn query(
        &self,
        entity_type: EntityType,
        filter: &RecordFilter,
    ) -> anyhow::Result<Vec<EntityPayload>> {
        let state = self.state.lock().await;
        let mut matches: Vec<EntityPayload> = state
            .entities
            .iter()
            .filter(|((ty, _), _)| *ty == entity_type)
            .map(|(_, payload)| payload)
            .filter(|payload| {
                let meta = payload.meta();
                if let Some(pending) = filter.pending_sync {
                    if meta.pending_sync != pending {
                        return false;
                    }
                }
                if let Some(since) = filter.updated_since {
                    if meta.updated_at <= since {
                        return false;
                    }
                }
                if !filter.include_deleted && meta.is_deleted {
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        matches.sort_by_key(|p| p.meta().updated_at);
        Ok(matches)
    }

    async fn delete(&self, entity_type: EntityType, id: &EntityId) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.entities.remove(&(entity_type, *id));
        Ok(())
    }

    async fn count(&self, entity_type: EntityType) -> anyhow::Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .entities
            .iter()
            .filter(|((ty, _), payload)| *ty == entity_type && !payload.meta().is_deleted)
            .count() as u64)
    }

    async fn save_queued_op(&self, op: &SyncOperation) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.queue.insert(op.id, op.clone());
        Ok(())
    }

    async fn remove_queued_op(&self, id: &OperationId) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.queue.remove(id);
        Ok(())
    }

    async fn load_queue(&self) -> anyhow::Result<Vec<SyncOperation>> {
        let state = self.state.lock().await;
        let mut ops: Vec<SyncOperation> = state.queue.values().cloned().collect();
        ops.sort_by_key(|op| (std::cmp::Reverse(op.priority), op.sequence));
        Ok(ops)
    }

    async fn save_dead_letter(&self, entry: &DeadLetterEntry) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state
            .dead_letters
            .retain(|e| e.operation.id != entry.operation.id);
        state.dead_letters.push(entry.clone());
        Ok(())
    }

    async fn load_dead_letters(&self) -> anyhow::Result<Vec<DeadLetterEntry>> {
        let state = self.state.lock().await;
        let mut entries = state.dead_letters.clone();
        entries.sort_by_key(|e| std::cmp::Reverse(e.dead_lettered_at));
        Ok(entries)
    }

    async fn remove_dead_letter(&self, id: &OperationId) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.dead_letters.retain(|e| e.operation.id != *id);
        Ok(())
    }

    async fn save_conflict(&self, record: &ConflictRecord) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.conflicts.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_conflict(&self, id: &ConflictId) -> anyhow::Result<Option<ConflictRecord>> {
        let state = self.state.lock().await;
        Ok(state.conflicts.get(id).cloned())
    }

    async fn pending_conflicts(&self) -> anyhow::Result<Vec<ConflictRecord>> {
        let state = self.state.lock().await;
        let mut pending: Vec<ConflictRecord> = state
            .conflicts
            .values()
            .filter(|record| record.status == ConflictStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|record| std::cmp::Reverse(record.detected_at));
        Ok(pending)
    }
}
