//! The durable priority operation queue
//!
//! In-memory ordering with write-through persistence: every mutation is
//! persisted via [`ILocalStore`] before the in-memory state changes, so a
//! crash at any point replays exactly the un-acknowledged set on restore.
//!
//! ## Ordering
//!
//! Operations drain by priority (Critical > High > Normal > Low); within a
//! priority band, enqueue order is preserved via a monotonic sequence
//! number. Operations targeting the same entity id are never reordered
//! relative to each other: a dequeue batch carries at most one operation
//! per entity, and an entity with an in-flight operation contributes
//! nothing further until that operation is acknowledged or requeued.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use cardbox_core::config::{QueueConfig, RetryConfig};
use cardbox_core::domain::{
    DeadLetterEntry, EntityId, EntityType, OperationId, Priority, SyncError, SyncOperation,
};
use cardbox_core::ports::ILocalStore;

use crate::backoff::retry_delay;

/// Result of a successful enqueue
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub id: OperationId,
    /// Operations evicted to make room, oldest-lowest-priority first
    pub evicted: Vec<SyncOperation>,
}

/// Result of requeueing a failed operation
#[derive(Debug, Clone)]
pub enum RequeueOutcome {
    /// The operation went back into the queue and becomes eligible again
    /// after `delay`
    Requeued { attempt: u32, delay: Duration },
    /// The operation exhausted its retry budget and moved to the
    /// dead-letter log
    DeadLettered(DeadLetterEntry),
}

struct Inner {
    /// Sorted by (priority descending, sequence ascending)
    queued: Vec<SyncOperation>,
    /// Dequeued but not yet acknowledged or requeued
    in_flight: HashMap<OperationId, SyncOperation>,
    /// Earliest re-dispatch time for requeued operations. Not persisted:
    /// after a restart everything is immediately eligible again.
    not_before: HashMap<OperationId, DateTime<Utc>>,
    next_sequence: u64,
}

impl Inner {
    fn insert_sorted(&mut self, op: SyncOperation) {
        let pos = self
            .queued
            .partition_point(|q| (q.priority, std::cmp::Reverse(q.sequence)) >= (op.priority, std::cmp::Reverse(op.sequence)));
        self.queued.insert(pos, op);
    }

    /// Index of the eviction candidate: oldest operation in the lowest
    /// priority band
    fn eviction_candidate(&self) -> Option<usize> {
        let min_priority = self.queued.iter().map(|op| op.priority).min()?;
        self.queued
            .iter()
            .enumerate()
            .filter(|(_, op)| op.priority == min_priority)
            .min_by_key(|(_, op)| op.sequence)
            .map(|(idx, _)| idx)
    }

    fn blocked_entities(&self) -> HashSet<EntityId> {
        self.in_flight.values().map(|op| op.entity_id()).collect()
    }
}

/// Durable priority queue of outbound sync operations
pub struct OperationQueue {
    store: Arc<dyn ILocalStore>,
    capacity: usize,
    max_retries: u32,
    retry: RetryConfig,
    inner: Mutex<Inner>,
}

impl OperationQueue {
    /// Restores the queue from the durable store. Every operation that was
    /// enqueued but not acknowledged before the last shutdown comes back,
    /// in its original order.
    pub async fn restore(
        store: Arc<dyn ILocalStore>,
        queue_config: &QueueConfig,
        retry_config: &RetryConfig,
    ) -> anyhow::Result<Self> {
        let queued = store.load_queue().await?;
        let next_sequence = queued.iter().map(|op| op.sequence).max().unwrap_or(0) + 1;
        debug!(restored = queued.len(), "operation queue restored");
        Ok(Self {
            store,
            capacity: queue_config.capacity,
            max_retries: queue_config.max_retries,
            retry: retry_config.clone(),
            inner: Mutex::new(Inner {
                queued,
                in_flight: HashMap::new(),
                not_before: HashMap::new(),
                next_sequence,
            }),
        })
    }

    /// Accepts an operation, assigns its sequence number, and persists it.
    ///
    /// When the queue is at capacity, the oldest operations in the lowest
    /// priority band are evicted to make room. If the incoming operation
    /// itself is the eviction candidate, it is rejected instead.
    ///
    /// # Errors
    ///
    /// [`SyncError::QueueOverflow`] when the operation cannot be admitted,
    /// [`SyncError::Storage`] on persistence failure.
    pub async fn enqueue(&self, mut op: SyncOperation) -> Result<EnqueueOutcome, SyncError> {
        let mut inner = self.inner.lock().await;
        op.sequence = inner.next_sequence;
        inner.next_sequence += 1;

        self.store
            .save_queued_op(&op)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        let id = op.id;
        inner.insert_sorted(op);

        let mut evicted = Vec::new();
        while inner.queued.len() > self.capacity {
            let idx = match inner.eviction_candidate() {
                Some(idx) => idx,
                None => break,
            };
            let victim = inner.queued.remove(idx);
            self.store
                .remove_queued_op(&victim.id)
                .await
                .map_err(|e| SyncError::Storage(e.to_string()))?;
            if victim.id == id {
                warn!(operation_id = %id, capacity = self.capacity, "queue full, incoming operation rejected");
                return Err(SyncError::QueueOverflow {
                    capacity: self.capacity,
                });
            }
            warn!(
                operation_id = %victim.id,
                priority = %victim.priority,
                "queue full, evicting oldest low-priority operation"
            );
            evicted.push(victim);
        }

        Ok(EnqueueOutcome { id, evicted })
    }

    /// Pops up to `limit` eligible operations of one entity type, moving
    /// them in-flight. At most one operation per entity id is returned,
    /// and entities with an in-flight or backoff-delayed operation are
    /// skipped entirely so per-entity order is preserved.
    pub async fn dequeue_batch(
        &self,
        entity_type: EntityType,
        limit: usize,
    ) -> Vec<SyncOperation> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let mut seen = inner.blocked_entities();
        let mut picked = Vec::new();

        let mut idx = 0;
        while idx < inner.queued.len() && picked.len() < limit {
            let op = &inner.queued[idx];
            if op.entity_type() != entity_type {
                idx += 1;
                continue;
            }
            let entity = op.entity_id();
            if seen.contains(&entity) {
                idx += 1;
                continue;
            }
            // Later operations for this entity must wait either way.
            seen.insert(entity);
            let delayed = inner
                .not_before
                .get(&op.id)
                .is_some_and(|ready_at| *ready_at > now);
            if delayed {
                idx += 1;
                continue;
            }
            let op = inner.queued.remove(idx);
            inner.not_before.remove(&op.id);
            picked.push(op);
        }

        for op in &picked {
            inner.in_flight.insert(op.id, op.clone());
        }
        picked
    }

    /// Same selection as [`dequeue_batch`](Self::dequeue_batch) without any
    /// state change. Used by dry-run dispatch.
    pub async fn peek_batch(&self, entity_type: EntityType, limit: usize) -> Vec<SyncOperation> {
        let now = Utc::now();
        let inner = self.inner.lock().await;
        let mut seen = inner.blocked_entities();
        let mut picked = Vec::new();

        for op in &inner.queued {
            if picked.len() >= limit {
                break;
            }
            if op.entity_type() != entity_type {
                continue;
            }
            let entity = op.entity_id();
            if seen.contains(&entity) {
                continue;
            }
            seen.insert(entity);
            let delayed = inner
                .not_before
                .get(&op.id)
                .is_some_and(|ready_at| *ready_at > now);
            if !delayed {
                picked.push(op.clone());
            }
        }
        picked
    }

    /// Acknowledges a completed operation, removing it from the queue and
    /// the durable store. Idempotent: acknowledging an unknown or
    /// already-acknowledged id is a no-op.
    pub async fn ack(&self, id: &OperationId) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let was_known =
            inner.in_flight.remove(id).is_some() || {
                let before = inner.queued.len();
                inner.queued.retain(|op| op.id != *id);
                inner.queued.len() != before
            };
        inner.not_before.remove(id);
        if was_known {
            self.store.remove_queued_op(id).await?;
        }
        Ok(())
    }

    /// Returns a failed in-flight operation to the queue with an
    /// incremented retry count and a backoff delay, or moves it to the
    /// dead-letter log when the retry budget is exhausted.
    ///
    /// Returns `None` for an id that is not in flight (already acked or
    /// never dequeued).
    pub async fn requeue(
        &self,
        id: &OperationId,
        error: &SyncError,
    ) -> anyhow::Result<Option<RequeueOutcome>> {
        let mut inner = self.inner.lock().await;
        let Some(mut op) = inner.in_flight.remove(id) else {
            warn!(operation_id = %id, "requeue for unknown operation ignored");
            return Ok(None);
        };
        op.retry_count += 1;

        if op.is_exhausted(self.max_retries) {
            let entry = DeadLetterEntry::new(
                op.clone(),
                error.to_string(),
                error.kind().to_string(),
                Utc::now(),
            );
            self.store.save_dead_letter(&entry).await?;
            self.store.remove_queued_op(id).await?;
            warn!(
                operation_id = %id,
                attempts = op.retry_count,
                error = %error,
                "operation exhausted retries, moved to dead-letter log"
            );
            return Ok(Some(RequeueOutcome::DeadLettered(entry)));
        }

        let delay = retry_delay(op.retry_count, &self.retry);
        let ready_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(30));
        self.store.save_queued_op(&op).await?;
        inner.not_before.insert(op.id, ready_at);
        let attempt = op.retry_count;
        debug!(operation_id = %id, attempt, delay_ms = delay.as_millis() as u64, "operation requeued with backoff");
        inner.insert_sorted(op);
        Ok(Some(RequeueOutcome::Requeued { attempt, delay }))
    }

    /// Number of queued operations (excluding in-flight)
    pub async fn depth(&self) -> usize {
        self.inner.lock().await.queued.len()
    }

    /// Number of queued operations for one entity type
    pub async fn depth_for(&self, entity_type: EntityType) -> usize {
        self.inner
            .lock()
            .await
            .queued
            .iter()
            .filter(|op| op.entity_type() == entity_type)
            .count()
    }

    /// Queued plus in-flight operations
    pub async fn pending(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.queued.len() + inner.in_flight.len()
    }

    /// Current dead-letter log, newest first
    pub async fn dead_letters(&self) -> anyhow::Result<Vec<DeadLetterEntry>> {
        self.store.load_dead_letters().await
    }

    /// Replays a dead-lettered operation: resets its retry count and
    /// enqueues it fresh. Returns `None` when the id is not in the log.
    pub async fn requeue_dead_letter(
        &self,
        id: &OperationId,
    ) -> anyhow::Result<Option<OperationId>> {
        let entry = self
            .store
            .load_dead_letters()
            .await?
            .into_iter()
            .find(|e| e.operation.id == *id);
        let Some(entry) = entry else {
            return Ok(None);
        };
        self.store.remove_dead_letter(id).await?;
        let mut op = entry.operation;
        op.retry_count = 0;
        match self.enqueue(op).await {
            Ok(outcome) => Ok(Some(outcome.id)),
            Err(e) => Err(anyhow::anyhow!("dead-letter replay failed: {e}")),
        }
    }

    /// Highest priority currently queued, if any
    pub async fn head_priority(&self) -> Option<Priority> {
        self.inner.lock().await.queued.first().map(|op| op.priority)
    }

    /// True when a queued or in-flight operation targets the entity.
    /// The pull path uses this to avoid enqueueing a duplicate push for a
    /// record whose pending change is already on its way out.
    pub async fn has_pending_for(&self, entity_id: &EntityId) -> bool {
        let inner = self.inner.lock().await;
        inner.queued.iter().any(|op| op.entity_id() == *entity_id)
            || inner
                .in_flight
                .values()
                .any(|op| op.entity_id() == *entity_id)
    }
}
