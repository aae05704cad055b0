//! Batch dispatcher - the push path
//!
//! Pops up to the adaptive batch size of one entity type from the queue,
//! partitions the batch into sub-batches, and executes the sub-batches
//! concurrently (bounded by `max_concurrent_batches`). Per-operation
//! failures are classified through [`SyncError::is_retryable`]: retryable
//! failures go back to the queue with backoff, terminal failures are
//! recorded as [`BatchError`]s and dropped with an audit entry.
//!
//! The queue guarantees a batch never carries two operations for the same
//! entity, so sub-batches can run concurrently without reordering
//! per-entity writes.
//!
//! The remote contract has no transaction primitive; batch recovery relies
//! on per-record idempotence instead (replaying an upsert converges).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use cardbox_core::config::DispatchConfig;
use cardbox_core::domain::{
    BatchError, BatchId, BatchResult, EntityType, OperationKind, SyncError, SyncOperation,
};
use cardbox_core::ports::{ILocalStore, INetworkMonitor, IRemoteBackend};
use cardbox_queue::{OperationQueue, RequeueOutcome};

const HISTORY_LIMIT: usize = 32;

/// Per-entity-type dispatch statistics feeding adaptive sizing
#[derive(Debug, Default, Clone, Copy)]
struct TypeStats {
    cycles: u64,
    processed: u64,
    successful: u64,
    total_duration_ms: u64,
}

impl TypeStats {
    fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            1.0
        } else {
            self.successful as f64 / self.processed as f64
        }
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.cycles as f64
        }
    }
}

enum OpStatus {
    Acked,
    Requeued,
    Failed(BatchError),
}

#[derive(Default)]
struct SubOutcome {
    successful: usize,
    failed: usize,
    errors: Vec<BatchError>,
}

/// Drains the operation queue against the remote backend
pub struct BatchDispatcher {
    queue: Arc<OperationQueue>,
    remote: Arc<dyn IRemoteBackend>,
    store: Arc<dyn ILocalStore>,
    network: Arc<dyn INetworkMonitor>,
    config: DispatchConfig,
    stats: DashMap<EntityType, TypeStats>,
    history: Mutex<VecDeque<BatchResult>>,
}

impl BatchDispatcher {
    pub fn new(
        queue: Arc<OperationQueue>,
        remote: Arc<dyn IRemoteBackend>,
        store: Arc<dyn ILocalStore>,
        network: Arc<dyn INetworkMonitor>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            remote,
            store,
            network,
            config,
            stats: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    /// Batch size for the next cycle: the network-scaled size, halved when
    /// the recent success rate for this entity type is poor, and capped at
    /// the configured initial size until feedback exists.
    pub fn adaptive_batch_size(&self, entity_type: EntityType) -> usize {
        let base = self
            .network
            .adaptive_batch_size(self.config.min_batch_size, self.config.max_batch_size);
        let size = match self.stats.get(&entity_type) {
            None => base.min(self.config.initial_batch_size),
            Some(stats) if stats.cycles > 0 && stats.success_rate() < 0.5 => base / 2,
            Some(_) => base,
        };
        size.clamp(self.config.min_batch_size, self.config.max_batch_size)
    }

    /// Executes one dispatch cycle for one entity type
    pub async fn dispatch(&self, entity_type: EntityType) -> BatchResult {
        let batch_size = self.adaptive_batch_size(entity_type);
        let ops = self.queue.dequeue_batch(entity_type, batch_size).await;
        if ops.is_empty() {
            return BatchResult::empty(entity_type);
        }

        let batch_id = BatchId::new();
        let processed = ops.len();
        let started = Instant::now();
        debug!(
            batch_id = %batch_id,
            entity_type = %entity_type,
            operations = processed,
            batch_size,
            "dispatching batch"
        );

        // Sub-batches sized so at most max_concurrent_batches run at once.
        let chunk_size = processed.div_ceil(self.config.max_concurrent_batches.max(1));
        let mut join_set: JoinSet<SubOutcome> = JoinSet::new();
        for chunk in ops.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let queue = self.queue.clone();
            let remote = self.remote.clone();
            let store = self.store.clone();
            join_set.spawn(async move {
                let mut outcome = SubOutcome::default();
                for op in chunk {
                    match execute_op(&*remote, &*store, &queue, &op).await {
                        OpStatus::Acked => outcome.successful += 1,
                        OpStatus::Requeued => {}
                        OpStatus::Failed(error) => {
                            outcome.failed += 1;
                            outcome.errors.push(error);
                        }
                    }
                }
                outcome
            });
        }

        let mut successful = 0;
        let mut failed = 0;
        let mut errors = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => {
                    successful += outcome.successful;
                    failed += outcome.failed;
                    errors.extend(outcome.errors);
                }
                Err(e) => {
                    // A panicked sub-batch loses its ops to the in-flight
                    // set; they come back on the next restore.
                    warn!(error = %e, "sub-batch task failed");
                }
            }
        }

        let result = BatchResult {
            batch_id,
            entity_type,
            processed,
            successful,
            failed,
            errors,
            duration: started.elapsed(),
        };
        self.record(&result);
        result
    }

    /// Runs the selection logic without any I/O, returning a zero-duration
    /// result describing what a real cycle would pick up
    pub async fn dry_run(&self, entity_type: EntityType) -> BatchResult {
        let batch_size = self.adaptive_batch_size(entity_type);
        let ops = self.queue.peek_batch(entity_type, batch_size).await;
        BatchResult {
            processed: ops.len(),
            ..BatchResult::empty(entity_type)
        }
    }

    /// Recent batch results, newest last, bounded
    pub fn recent_results(&self) -> Vec<BatchResult> {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Average per-cycle latency for an entity type, in milliseconds
    pub fn avg_latency_ms(&self, entity_type: EntityType) -> f64 {
        self.stats
            .get(&entity_type)
            .map(|s| s.avg_latency_ms())
            .unwrap_or(0.0)
    }

    fn record(&self, result: &BatchResult) {
        let mut stats = self.stats.entry(result.entity_type).or_default();
        stats.cycles += 1;
        stats.processed += result.processed as u64;
        stats.successful += result.successful as u64;
        stats.total_duration_ms += result.duration.as_millis() as u64;
        drop(stats);

        let mut history = self
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(result.clone());
    }
}

/// Executes one operation against the remote and settles it in the queue
async fn execute_op(
    remote: &dyn IRemoteBackend,
    store: &dyn ILocalStore,
    queue: &OperationQueue,
    op: &SyncOperation,
) -> OpStatus {
    let remote_result = match op.kind {
        OperationKind::Delete => remote
            .soft_delete(op.entity_type(), &op.entity_id())
            .await
            .map(|()| None),
        OperationKind::Create | OperationKind::Update => {
            remote.upsert(&op.payload).await.map(Some)
        }
    };

    match remote_result {
        Ok(remote_payload) => {
            // Clear pending_sync on the acknowledged record. For deletes
            // the local tombstone itself is acknowledged.
            let mut acknowledged = remote_payload.unwrap_or_else(|| op.payload.clone());
            acknowledged.meta_mut().acknowledge();
            if let Err(e) = store.put(&acknowledged).await {
                // The remote accepted the write; treat the local failure
                // as transient and retry the whole op (the remote upsert
                // is idempotent).
                let storage = SyncError::Storage(e.to_string());
                return settle_failure(queue, op, &storage).await;
            }
            if let Err(e) = queue.ack(&op.id).await {
                warn!(operation_id = %op.id, error = %e, "ack failed after successful push");
            }
            OpStatus::Acked
        }
        Err(error) if error.is_retryable() => settle_failure(queue, op, &error).await,
        Err(error) => {
            // Terminal: drop with an audit entry, never retried.
            warn!(
                operation_id = %op.id,
                entity_id = %op.entity_id(),
                error = %error,
                "terminal failure, dropping operation"
            );
            if let Err(e) = queue.ack(&op.id).await {
                warn!(operation_id = %op.id, error = %e, "ack failed for dropped operation");
            }
            OpStatus::Failed(BatchError {
                operation_id: op.id,
                error_kind: error.kind().to_string(),
                message: error.to_string(),
            })
        }
    }
}

async fn settle_failure(
    queue: &OperationQueue,
    op: &SyncOperation,
    error: &SyncError,
) -> OpStatus {
    match queue.requeue(&op.id, error).await {
        Ok(Some(RequeueOutcome::Requeued { .. })) => OpStatus::Requeued,
        Ok(Some(RequeueOutcome::DeadLettered(entry))) => OpStatus::Failed(BatchError {
            operation_id: op.id,
            error_kind: "dead_lettered".to_string(),
            message: entry.final_error,
        }),
        Ok(None) => OpStatus::Requeued,
        Err(e) => {
            warn!(operation_id = %op.id, error = %e, "requeue failed");
            OpStatus::Failed(BatchError {
                operation_id: op.id,
                error_kind: "storage".to_string(),
                message: e.to_string(),
            })
        }
    }
}
