//! Sync orchestrator - the Idle → PullPhase → PushPhase state machine
//!
//! Single logical coordinator for the engine. A full sync pulls remote
//! changes per entity type, runs each through the conflict detector, then
//! drains the queue through the dispatcher; an incremental sync is
//! push-only. Execution is single-flight: a second call while a cycle is
//! in progress is a no-op. Pausing is cooperative, checked between
//! batches, so no operation is interrupted mid-flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cardbox_core::domain::{
    ConflictId, ConflictRecord, EntityId, EntityPayload, EntityType, OperationId, OperationKind,
    ResolutionStrategy, SyncError, SyncHealth, SyncOperation, SyncPhase, SyncProgress, SyncStatus,
};
use cardbox_core::ports::{IAuthProvider, ILocalStore, INetworkMonitor, IRemoteBackend};
use cardbox_conflict::{resolver, ConflictDetector, Detection, PolicyEngine, ResolvedOutcome};
use cardbox_queue::OperationQueue;

use crate::dispatcher::BatchDispatcher;
use crate::health::HealthTracker;
use crate::notifier::StatusNotifier;

/// Why a sync request did not start a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    Unauthenticated,
    Paused,
}

/// Summary of one completed sync cycle
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub full: bool,
    /// Remote records applied locally during the pull phase
    pub pulled: usize,
    /// Operations acknowledged during the push phase
    pub pushed: usize,
    /// Terminal or dead-lettered operations
    pub failed: usize,
    pub conflicts_detected: usize,
    pub conflicts_auto_resolved: usize,
    pub duration: Duration,
}

/// Result of a sync request
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// A cycle was already running; this request was a no-op
    AlreadyRunning,
    Skipped(SkipReason),
}

/// The engine facade exposed to the UI layer
pub struct SyncOrchestrator {
    store: Arc<dyn ILocalStore>,
    remote: Arc<dyn IRemoteBackend>,
    auth: Arc<dyn IAuthProvider>,
    network: Arc<dyn INetworkMonitor>,
    queue: Arc<OperationQueue>,
    dispatcher: Arc<BatchDispatcher>,
    detector: ConflictDetector,
    policy: PolicyEngine,
    notifier: StatusNotifier,
    health: HealthTracker,
    sync_in_progress: AtomicBool,
    paused: AtomicBool,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
    /// Entities blocked behind a conflict awaiting manual resolution
    blocked: Mutex<HashMap<EntityId, ConflictId>>,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ILocalStore>,
        remote: Arc<dyn IRemoteBackend>,
        auth: Arc<dyn IAuthProvider>,
        network: Arc<dyn INetworkMonitor>,
        queue: Arc<OperationQueue>,
        dispatcher: Arc<BatchDispatcher>,
        policy: PolicyEngine,
        notifier: StatusNotifier,
        health: HealthTracker,
    ) -> Self {
        Self {
            store,
            remote,
            auth,
            network,
            queue,
            dispatcher,
            detector: ConflictDetector::new(),
            policy,
            notifier,
            health,
            sync_in_progress: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            last_sync_time: Mutex::new(None),
            blocked: Mutex::new(HashMap::new()),
        }
    }

    /// Reloads the manual-conflict block list from the conflict log.
    /// Call once after restart so entities stay blocked across sessions.
    pub async fn restore_pending(&self) -> anyhow::Result<usize> {
        let pending = self.store.pending_conflicts().await?;
        let mut blocked = lock(&self.blocked);
        for record in &pending {
            blocked.insert(record.entity_id, record.id);
        }
        Ok(pending.len())
    }

    // ------------------------------------------------------------------
    // Queueing
    // ------------------------------------------------------------------

    /// Validates and accepts a local mutation: writes the local replica
    /// and enqueues the push operation.
    ///
    /// The replica's `sync_version` strictly increases on every accepted
    /// write. A payload that does not advance the stored version is either
    /// a replay of an already-accepted write (ignored) or an edit the
    /// caller forgot to record, which is stamped onto the stored version
    /// here.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] for a malformed payload
    /// - [`SyncError::UnresolvedConflict`] when the entity is blocked
    ///   behind a manual conflict
    /// - [`SyncError::QueueOverflow`] / [`SyncError::Storage`] from the
    ///   queue
    pub async fn queue_operation(&self, mut op: SyncOperation) -> Result<OperationId, SyncError> {
        validate_payload(&op.payload)?;

        let entity_id = op.entity_id();
        if let Some(conflict_id) = lock(&self.blocked).get(&entity_id).copied() {
            return Err(SyncError::UnresolvedConflict {
                entity_id,
                conflict_id,
            });
        }

        let existing = self
            .store
            .get(op.payload.entity_type(), &entity_id)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        if let Some(existing) = existing {
            if existing.meta().is_stale_write(op.payload.meta().sync_version) {
                if op.payload.same_content(&existing) {
                    debug!(
                        entity_id = %entity_id,
                        version = op.payload.meta().sync_version,
                        "write does not advance the version and changes nothing, ignored"
                    );
                    return Ok(op.id);
                }
                let at = op.payload.meta().updated_at;
                let is_deleted = op.payload.meta().is_deleted;
                let mut meta = existing.meta().clone();
                meta.record_local_write(at);
                meta.is_deleted = is_deleted;
                *op.payload.meta_mut() = meta;
            }
        }

        self.store
            .put(&op.payload)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        let outcome = self.queue.enqueue(op).await?;
        for evicted in &outcome.evicted {
            warn!(operation_id = %evicted.id, "operation evicted by queue overflow");
        }
        self.refresh_status().await;
        Ok(outcome.id)
    }

    // ------------------------------------------------------------------
    // Sync cycles
    // ------------------------------------------------------------------

    /// Pull remote changes, reconcile, then drain the queue
    pub async fn perform_full_sync(&self) -> SyncOutcome {
        self.sync_cycle(true).await
    }

    /// Push-only cycle
    pub async fn perform_incremental_sync(&self) -> SyncOutcome {
        self.sync_cycle(false).await
    }

    async fn sync_cycle(&self, full: bool) -> SyncOutcome {
        if self.paused.load(Ordering::Acquire) {
            return SyncOutcome::Skipped(SkipReason::Paused);
        }
        if !self.auth.is_authenticated() {
            return SyncOutcome::Skipped(SkipReason::Unauthenticated);
        }
        if !self.network.is_online() {
            return SyncOutcome::Skipped(SkipReason::Offline);
        }
        // Single-flight guard.
        if self.sync_in_progress.swap(true, Ordering::AcqRel) {
            debug!("sync already in progress, request ignored");
            return SyncOutcome::AlreadyRunning;
        }

        self.refresh_status().await;
        let started = std::time::Instant::now();
        let mut report = SyncReport {
            full,
            ..SyncReport::default()
        };
        let mut pull_ok = true;

        if full {
            pull_ok = self.pull_phase(&mut report).await;
        }
        self.push_phase(&mut report).await;

        if full && pull_ok {
            *lock(&self.last_sync_time) = Some(Utc::now());
        }
        report.duration = started.elapsed();

        let success = pull_ok && report.failed == 0;
        self.network.record_cycle(success);
        self.health.record_cycle(success);
        self.sync_in_progress.store(false, Ordering::Release);
        self.refresh_status().await;
        self.notifier.emit_progress(&SyncProgress {
            phase: SyncPhase::Idle,
            entity_type: None,
            completed: 0,
            total: 0,
        });

        info!(
            full,
            pulled = report.pulled,
            pushed = report.pushed,
            failed = report.failed,
            conflicts = report.conflicts_detected,
            duration_ms = report.duration.as_millis() as u64,
            "sync cycle finished"
        );
        SyncOutcome::Completed(report)
    }

    /// Pull phase: reconcile remote records per entity type. Returns false
    /// when any remote read failed (lastSyncTime must not advance then).
    async fn pull_phase(&self, report: &mut SyncReport) -> bool {
        let since = *lock(&self.last_sync_time);
        let mut ok = true;
        for (idx, entity_type) in EntityType::ALL.into_iter().enumerate() {
            self.notifier.emit_progress(&SyncProgress {
                phase: SyncPhase::PullPhase,
                entity_type: Some(entity_type),
                completed: idx,
                total: EntityType::ALL.len(),
            });
            let remote_records = match self.remote.select(entity_type, since).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(entity_type = %entity_type, error = %e, "remote read failed, skipping type");
                    ok = false;
                    continue;
                }
            };
            for remote_record in remote_records {
                if let Err(e) = self.reconcile(remote_record, report).await {
                    warn!(error = %e, "reconcile failed");
                    ok = false;
                }
            }
        }
        ok
    }

    /// Reconciles one remote record against the local replica
    async fn reconcile(
        &self,
        remote_record: EntityPayload,
        report: &mut SyncReport,
    ) -> anyhow::Result<()> {
        let entity_type = remote_record.entity_type();
        let entity_id = remote_record.id();

        let Some(local_record) = self.store.get(entity_type, &entity_id).await? else {
            // Unknown locally: plain pull.
            let mut pulled = remote_record;
            pulled.meta_mut().pending_sync = false;
            self.store.put(&pulled).await?;
            report.pulled += 1;
            return Ok(());
        };

        match self
            .detector
            .detect(&local_record, &remote_record, Utc::now())?
        {
            Detection::InSync => {}
            Detection::ApplyRemote => {
                let mut pulled = remote_record;
                pulled.meta_mut().pending_sync = false;
                // The replica's version never regresses, even when the
                // remote counter lags the local one.
                if local_record.meta().is_stale_write(pulled.meta().sync_version) {
                    let at = pulled.meta().updated_at;
                    let is_deleted = pulled.meta().is_deleted;
                    let mut meta = local_record.meta().clone();
                    meta.record_remote_write(at);
                    meta.is_deleted = is_deleted;
                    *pulled.meta_mut() = meta;
                }
                self.store.put(&pulled).await?;
                report.pulled += 1;
            }
            Detection::PushLocal => {
                // The local edit is newer; it must win remotely. Normally
                // its push op is already queued from queue_operation.
                if !self.queue.has_pending_for(&entity_id).await {
                    let op =
                        SyncOperation::new(OperationKind::Update, local_record, Utc::now());
                    if let Err(e) = self.queue.enqueue(op).await {
                        warn!(entity_id = %entity_id, error = %e, "failed to enqueue push for newer local record");
                    }
                }
            }
            Detection::Conflicted(record) => {
                report.conflicts_detected += 1;
                self.store.save_conflict(&record).await?;
                let strategy = self.policy.strategy_for(&record);
                if strategy == ResolutionStrategy::Manual {
                    lock(&self.blocked).insert(record.entity_id, record.id);
                    self.notifier.emit_conflict(&record);
                } else {
                    self.apply_resolution(record, strategy).await?;
                    report.conflicts_auto_resolved += 1;
                }
            }
        }
        Ok(())
    }

    /// Push phase: drain the queue type by type, cooperating with pause
    async fn push_phase(&self, report: &mut SyncReport) {
        for (idx, entity_type) in EntityType::ALL.into_iter().enumerate() {
            loop {
                if self.paused.load(Ordering::Acquire) {
                    info!("pause requested, stopping between batches");
                    return;
                }
                let result = self.dispatcher.dispatch(entity_type).await;
                if result.processed == 0 {
                    break;
                }
                report.pushed += result.successful;
                report.failed += result.failed;
                self.notifier.emit_progress(&SyncProgress {
                    phase: SyncPhase::PushPhase,
                    entity_type: Some(entity_type),
                    completed: idx,
                    total: EntityType::ALL.len(),
                });
                // Requeued ops are delayed by backoff; a batch that acked
                // and failed nothing would spin against them otherwise.
                if result.successful == 0 && result.failed == 0 {
                    break;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Conflict resolution
    // ------------------------------------------------------------------

    /// Applies an explicit resolution choice to a pending conflict.
    ///
    /// Idempotent: resolving an already-resolved conflict is a no-op.
    ///
    /// # Errors
    ///
    /// Fails when the conflict id is unknown or storage fails.
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
    ) -> anyhow::Result<()> {
        let Some(record) = self.store.get_conflict(id).await? else {
            anyhow::bail!("conflict {id} not found");
        };
        if !record.is_pending() {
            debug!(conflict_id = %id, "conflict already resolved, no-op");
            return Ok(());
        }
        if strategy == ResolutionStrategy::Manual {
            // An explicit "manual" choice just keeps the conflict pending.
            lock(&self.blocked).insert(record.entity_id, record.id);
            return Ok(());
        }
        self.apply_resolution(record, strategy).await?;
        self.refresh_status().await;
        Ok(())
    }

    /// Resolves and persists; unblocks the entity on success
    async fn apply_resolution(
        &self,
        record: ConflictRecord,
        strategy: ResolutionStrategy,
    ) -> anyhow::Result<()> {
        let outcome = resolver::resolve(&record.local_snapshot, &record.remote_snapshot, strategy)?;
        match outcome {
            ResolvedOutcome::Keep(mut kept) => {
                self.advance_past_stored(&mut kept).await?;
                let needs_push = kept.meta().pending_sync;
                self.store.put(&kept).await?;
                if needs_push && !self.queue.has_pending_for(&kept.id()).await {
                    let op = SyncOperation::new(OperationKind::Update, kept, Utc::now());
                    if let Err(e) = self.queue.enqueue(op).await {
                        warn!(error = %e, "failed to enqueue resolved record");
                    }
                }
            }
            ResolvedOutcome::KeepBoth {
                mut canonical,
                duplicate,
            } => {
                self.advance_past_stored(&mut canonical).await?;
                self.store.bulk_put(&[canonical, duplicate.clone()]).await?;
                let op = SyncOperation::new(OperationKind::Create, duplicate, Utc::now());
                if let Err(e) = self.queue.enqueue(op).await {
                    warn!(error = %e, "failed to enqueue duplicated record");
                }
            }
            ResolvedOutcome::Manual => {
                lock(&self.blocked).insert(record.entity_id, record.id);
                self.notifier.emit_conflict(&record);
                return Ok(());
            }
        }

        let entity_id = record.entity_id;
        if let Some(resolved) = record.into_resolved(strategy, Utc::now()) {
            self.store.save_conflict(&resolved).await?;
            self.notifier.emit_conflict(&resolved);
        }
        lock(&self.blocked).remove(&entity_id);
        Ok(())
    }

    /// Bumps a resolved record's version past the stored one when the
    /// resolution snapshot would not advance it, keeping the replica's
    /// version strictly increasing.
    async fn advance_past_stored(&self, payload: &mut EntityPayload) -> anyhow::Result<()> {
        let Some(stored) = self.store.get(payload.entity_type(), &payload.id()).await? else {
            return Ok(());
        };
        if stored.meta().is_stale_write(payload.meta().sync_version) {
            payload.meta_mut().sync_version = stored.meta().sync_version + 1;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pause / resume and introspection
    // ------------------------------------------------------------------

    /// Requests a pause. The in-flight batch completes; the next batch
    /// does not start.
    pub fn pause_sync(&self) {
        info!("sync paused");
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume_sync(&self) {
        info!("sync resumed");
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// The last broadcast status snapshot
    pub fn current_status(&self) -> SyncStatus {
        self.notifier.current_status()
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.depth().await
    }

    /// Derived tri-state health indicator
    pub async fn current_health(&self) -> SyncHealth {
        self.health.assess(self.queue.depth().await)
    }

    pub fn notifier(&self) -> &StatusNotifier {
        &self.notifier
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_sync_time)
    }

    /// Recomputes the process-wide status snapshot and broadcasts it
    pub async fn refresh_status(&self) {
        let pending_operations = self.queue.pending().await;
        let has_conflicts = match self.store.pending_conflicts().await {
            Ok(pending) => !pending.is_empty(),
            Err(e) => {
                warn!(error = %e, "failed to read pending conflicts");
                !lock(&self.blocked).is_empty()
            }
        };
        self.notifier.emit_status(SyncStatus {
            is_online: self.network.is_online(),
            sync_in_progress: self.sync_in_progress.load(Ordering::Acquire),
            pending_operations,
            has_conflicts,
            last_sync_time: *lock(&self.last_sync_time),
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Structural validation applied before an operation is admitted
fn validate_payload(payload: &EntityPayload) -> Result<(), SyncError> {
    let reason = match payload {
        EntityPayload::Card(card) if card.title.trim().is_empty() => {
            Some("card title must not be empty")
        }
        EntityPayload::Folder(folder) if folder.name.trim().is_empty() => {
            Some("folder name must not be empty")
        }
        EntityPayload::Tag(tag) if tag.name.trim().is_empty() => {
            Some("tag name must not be empty")
        }
        EntityPayload::Image(image) if image.file_name.trim().is_empty() => {
            Some("image file name must not be empty")
        }
        EntityPayload::Image(image) if image.blob_ref.trim().is_empty() => {
            Some("image blob reference must not be empty")
        }
        _ => None,
    };
    match reason {
        Some(reason) => Err(SyncError::Validation {
            entity_id: payload.id(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
