//! End-to-end engine tests against in-memory adapters
//!
//! The fixtures wire the real queue, dispatcher, and orchestrator to a
//! fake remote backend, the in-memory local store, and the adaptive
//! network monitor, then drive whole sync cycles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{watch, Notify};

use cardbox_core::config::{DispatchConfig, HealthConfig, QueueConfig, RetryConfig, SyncConfig};
use cardbox_core::domain::{
    Card, ConflictId, ConflictKind, EntityId, EntityPayload, EntityType, OperationKind,
    ResolutionStrategy, SyncError, SyncMeta, SyncOperation, UserId,
};
use cardbox_core::ports::{
    AuthState, IAuthProvider, ILocalStore, IRemoteBackend, NetworkState, QualityTier,
};
use cardbox_engine::orchestrator::{SkipReason, SyncOutcome};
use cardbox_engine::{BatchDispatcher, HealthTracker, StatusNotifier, SyncOrchestrator, SyncScheduler};
use cardbox_net::AdaptiveNetworkMonitor;
use cardbox_queue::OperationQueue;
use cardbox_store::MemoryLocalStore;
use cardbox_conflict::PolicyEngine;

// ====================================================================
// Fakes
// ====================================================================

/// In-memory remote with scriptable failures
#[derive(Default)]
struct FakeRemote {
    records: Mutex<HashMap<(EntityType, EntityId), EntityPayload>>,
    /// Errors returned by the next upserts, in order
    upsert_failures: Mutex<Vec<SyncError>>,
    upsert_calls: AtomicUsize,
    /// When set, `select` parks until `release` is notified
    block_select: AtomicBool,
    release: Notify,
}

impl FakeRemote {
    fn new() -> Self {
        Self::default()
    }

    fn fail_next_upserts(&self, errors: Vec<SyncError>) {
        let mut failures = self.upsert_failures.lock().unwrap();
        *failures = errors;
    }

    fn insert(&self, payload: EntityPayload) {
        self.records
            .lock()
            .unwrap()
            .insert((payload.entity_type(), payload.id()), payload);
    }

    fn get(&self, entity_type: EntityType, id: &EntityId) -> Option<EntityPayload> {
        self.records.lock().unwrap().get(&(entity_type, *id)).cloned()
    }

    fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl IRemoteBackend for FakeRemote {
    async fn upsert(&self, payload: &EntityPayload) -> Result<EntityPayload, SyncError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.upsert_failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        self.insert(payload.clone());
        Ok(payload.clone())
    }

    async fn soft_delete(
        &self,
        entity_type: EntityType,
        id: &EntityId,
    ) -> Result<(), SyncError> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(&(entity_type, *id)) {
            record.meta_mut().is_deleted = true;
        }
        Ok(())
    }

    async fn select(
        &self,
        entity_type: EntityType,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EntityPayload>, SyncError> {
        if self.block_select.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|((ty, _), record)| {
                *ty == entity_type
                    && updated_since.map_or(true, |since| record.meta().updated_at > since)
            })
            .map(|(_, record)| record.clone())
            .collect())
    }
}

struct FakeAuth {
    user: Mutex<Option<UserId>>,
    tx: watch::Sender<AuthState>,
}

impl FakeAuth {
    fn signed_in() -> Self {
        let user = UserId::new();
        let (tx, _) = watch::channel(AuthState::Authenticated(user));
        Self {
            user: Mutex::new(Some(user)),
            tx,
        }
    }

    fn signed_out() -> Self {
        let (tx, _) = watch::channel(AuthState::SignedOut);
        Self {
            user: Mutex::new(None),
            tx,
        }
    }

    fn sign_in(&self) -> UserId {
        let user = UserId::new();
        *self.user.lock().unwrap() = Some(user);
        let _ = self.tx.send(AuthState::Authenticated(user));
        user
    }
}

impl IAuthProvider for FakeAuth {
    fn current_user(&self) -> Option<UserId> {
        *self.user.lock().unwrap()
    }

    fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }
}

// ====================================================================
// Fixture
// ====================================================================

struct Engine {
    orchestrator: Arc<SyncOrchestrator>,
    remote: Arc<FakeRemote>,
    store: Arc<MemoryLocalStore>,
    network: Arc<AdaptiveNetworkMonitor>,
    queue: Arc<OperationQueue>,
}

async fn engine_with(policy: PolicyEngine, auth: Arc<dyn IAuthProvider>) -> Engine {
    let store = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(FakeRemote::new());
    let network = Arc::new(AdaptiveNetworkMonitor::new());

    let queue_config = QueueConfig {
        max_retries: 3,
        capacity: 1000,
    };
    // Zero backoff keeps retried operations eligible immediately.
    let retry_config = RetryConfig {
        base_delay_ms: 0,
        multiplier: 1,
        cap_ms: 0,
    };
    let queue = Arc::new(
        OperationQueue::restore(store.clone(), &queue_config, &retry_config)
            .await
            .unwrap(),
    );

    let dispatch_config = DispatchConfig {
        initial_batch_size: 20,
        min_batch_size: 10,
        max_batch_size: 200,
        max_concurrent_batches: 3,
    };
    let dispatcher = Arc::new(BatchDispatcher::new(
        queue.clone(),
        remote.clone(),
        store.clone(),
        network.clone(),
        dispatch_config,
    ));

    let orchestrator = Arc::new(SyncOrchestrator::new(
        store.clone(),
        remote.clone(),
        auth,
        network.clone(),
        queue.clone(),
        dispatcher,
        policy,
        StatusNotifier::new(),
        HealthTracker::new(HealthConfig::default()),
    ));

    Engine {
        orchestrator,
        remote,
        store,
        network,
        queue,
    }
}

async fn engine() -> Engine {
    engine_with(PolicyEngine::default(), Arc::new(FakeAuth::signed_in())).await
}

fn card(id: EntityId, title: &str, body: &str, ts: &str, pending: bool) -> EntityPayload {
    EntityPayload::Card(Card {
        id,
        title: title.to_string(),
        body: body.to_string(),
        folder_id: None,
        tag_ids: Vec::new(),
        meta: SyncMeta {
            sync_version: 1,
            pending_sync: pending,
            updated_at: ts.parse().unwrap(),
            is_deleted: false,
        },
    })
}

fn new_card(title: &str) -> EntityPayload {
    EntityPayload::Card(Card {
        id: EntityId::new(),
        title: title.to_string(),
        body: String::new(),
        folder_id: None,
        tag_ids: Vec::new(),
        meta: SyncMeta::new_local(Utc::now()),
    })
}

fn report(outcome: SyncOutcome) -> cardbox_engine::SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        other => panic!("expected completed sync, got {other:?}"),
    }
}

const T_OLD: &str = "2026-01-01T00:00:00Z";
const T_NEW: &str = "2026-01-02T00:00:00Z";

// ====================================================================
// Offline queueing and the push path
// ====================================================================

#[tokio::test]
async fn test_offline_create_syncs_once_online() {
    let engine = engine().await;
    // Offline: the write is accepted locally and queued.
    let payload = new_card("offline note");
    let id = payload.id();
    let op = SyncOperation::new(OperationKind::Create, payload, Utc::now());
    engine.orchestrator.queue_operation(op).await.unwrap();
    assert_eq!(engine.orchestrator.queue_depth().await, 1);

    // Syncing while offline is a no-op.
    assert!(matches!(
        engine.orchestrator.perform_incremental_sync().await,
        SyncOutcome::Skipped(SkipReason::Offline)
    ));
    assert_eq!(engine.orchestrator.queue_depth().await, 1);

    // Connectivity returns: one cycle drains the queue.
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));
    let report = report(engine.orchestrator.perform_incremental_sync().await);
    assert_eq!(report.pushed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(engine.orchestrator.queue_depth().await, 0);

    // Remote has the record, local is acknowledged.
    assert!(engine.remote.get(EntityType::Card, &id).is_some());
    let local = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    assert!(!local.meta().pending_sync);
}

#[tokio::test]
async fn test_unauthenticated_sync_is_skipped() {
    let engine =
        engine_with(PolicyEngine::default(), Arc::new(FakeAuth::signed_out())).await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));
    assert!(matches!(
        engine.orchestrator.perform_full_sync().await,
        SyncOutcome::Skipped(SkipReason::Unauthenticated)
    ));
}

#[tokio::test]
async fn test_hundred_operations_drain_in_bounded_batches() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    for i in 0..100 {
        let op = SyncOperation::new(
            OperationKind::Create,
            new_card(&format!("note {i}")),
            Utc::now(),
        );
        engine.orchestrator.queue_operation(op).await.unwrap();
    }
    assert_eq!(engine.orchestrator.queue_depth().await, 100);

    let report = report(engine.orchestrator.perform_incremental_sync().await);
    assert_eq!(report.pushed, 100);
    assert_eq!(report.failed, 0);
    assert_eq!(engine.orchestrator.queue_depth().await, 0);
    assert_eq!(engine.remote.record_count(), 100);
}

#[tokio::test]
async fn test_retryable_failures_eventually_drain() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));
    engine.remote.fail_next_upserts(vec![
        SyncError::Network("connection reset".to_string()),
        SyncError::Server {
            status: 503,
            message: "unavailable".to_string(),
        },
    ]);

    let payload = new_card("flaky");
    let id = payload.id();
    let op = SyncOperation::new(OperationKind::Create, payload, Utc::now());
    engine.orchestrator.queue_operation(op).await.unwrap();

    // Two failing cycles. Backoff is zeroed in the fixture.
    report(engine.orchestrator.perform_incremental_sync().await);
    report(engine.orchestrator.perform_incremental_sync().await);

    // Both attempts are recorded on the persisted queue entry.
    let queued = engine.store.load_queue().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].retry_count, 2);

    // The third cycle succeeds with the budget intact.
    report(engine.orchestrator.perform_incremental_sync().await);
    assert_eq!(engine.orchestrator.queue_depth().await, 0);
    assert!(engine.remote.get(EntityType::Card, &id).is_some());
    assert_eq!(engine.queue.dead_letters().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_terminal_failure_drops_operation() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));
    engine.remote.fail_next_upserts(vec![SyncError::Client {
        status: 404,
        message: "unknown collection".to_string(),
    }]);

    let op = SyncOperation::new(OperationKind::Create, new_card("doomed"), Utc::now());
    engine.orchestrator.queue_operation(op).await.unwrap();

    let report = report(engine.orchestrator.perform_incremental_sync().await);
    assert_eq!(report.pushed, 0);
    assert_eq!(report.failed, 1);
    // Dropped, not retried, not dead-lettered.
    assert_eq!(engine.orchestrator.queue_depth().await, 0);
    assert_eq!(engine.queue.dead_letters().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));
    engine.remote.fail_next_upserts(vec![
        SyncError::Network("down".to_string());
        10
    ]);

    let op = SyncOperation::new(OperationKind::Create, new_card("unlucky"), Utc::now());
    let op_id = engine.orchestrator.queue_operation(op).await.unwrap();

    for _ in 0..5 {
        report(engine.orchestrator.perform_incremental_sync().await);
        if engine.orchestrator.queue_depth().await == 0 {
            break;
        }
    }
    assert_eq!(engine.orchestrator.queue_depth().await, 0);
    let dead = engine.queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].operation.id, op_id);
    assert_eq!(dead[0].error_kind, "network");
}

#[tokio::test]
async fn test_replayed_upsert_converges() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let payload = new_card("idempotent");
    let id = payload.id();
    let op = SyncOperation::new(OperationKind::Create, payload.clone(), Utc::now());
    engine.orchestrator.queue_operation(op).await.unwrap();
    report(engine.orchestrator.perform_incremental_sync().await);

    // Pushing the same snapshot again changes nothing.
    let replay = SyncOperation::new(OperationKind::Update, payload, Utc::now());
    engine.orchestrator.queue_operation(replay).await.unwrap();
    report(engine.orchestrator.perform_incremental_sync().await);

    assert_eq!(engine.remote.record_count(), 1);
    assert!(engine.remote.get(EntityType::Card, &id).is_some());
}

// ====================================================================
// Validation and guard rails
// ====================================================================

#[tokio::test]
async fn test_invalid_payload_is_rejected_before_queueing() {
    let engine = engine().await;
    let op = SyncOperation::new(OperationKind::Create, new_card("   "), Utc::now());
    let result = engine.orchestrator.queue_operation(op).await;
    assert!(matches!(result, Err(SyncError::Validation { .. })));
    assert_eq!(engine.orchestrator.queue_depth().await, 0);
}

#[tokio::test]
async fn test_second_sync_call_is_a_noop_while_running() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));
    engine.remote.block_select.store(true, Ordering::SeqCst);

    let orchestrator = engine.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.perform_full_sync().await });

    // Wait until the first cycle is parked inside the pull phase.
    while !engine.orchestrator.current_status().sync_in_progress {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(matches!(
        engine.orchestrator.perform_full_sync().await,
        SyncOutcome::AlreadyRunning
    ));

    engine.remote.block_select.store(false, Ordering::SeqCst);
    engine.remote.release.notify_waiters();
    report(first.await.unwrap());
    assert!(!engine.orchestrator.current_status().sync_in_progress);
}

#[tokio::test]
async fn test_paused_sync_is_skipped_until_resume() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    engine.orchestrator.pause_sync();
    assert!(matches!(
        engine.orchestrator.perform_full_sync().await,
        SyncOutcome::Skipped(SkipReason::Paused)
    ));

    engine.orchestrator.resume_sync();
    report(engine.orchestrator.perform_full_sync().await);
}

// ====================================================================
// Pull phase and conflicts
// ====================================================================

#[tokio::test]
async fn test_pull_applies_unknown_remote_records() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let id = EntityId::new();
    engine
        .remote
        .insert(card(id, "remote only", "body", T_NEW, false));

    let report = report(engine.orchestrator.perform_full_sync().await);
    assert_eq!(report.pulled, 1);
    let local = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    assert!(!local.meta().pending_sync);
    assert!(engine.orchestrator.last_sync_time().is_some());
}

#[tokio::test]
async fn test_pull_leaves_newer_pending_local_untouched() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let id = EntityId::new();
    engine
        .remote
        .insert(card(id, "stale", "remote body", T_OLD, false));
    let local = card(id, "fresh", "local body", T_NEW, true);
    engine.store.put(&local).await.unwrap();

    let report = report(engine.orchestrator.perform_full_sync().await);
    assert_eq!(report.conflicts_detected, 0);

    // The push beat the pull: local content survived and reached the remote.
    let after = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    match &after {
        EntityPayload::Card(card) => assert_eq!(card.title, "fresh"),
        other => panic!("unexpected payload {other:?}"),
    }
    let remote_after = engine.remote.get(EntityType::Card, &id).unwrap();
    match &remote_after {
        EntityPayload::Card(card) => assert_eq!(card.title, "fresh"),
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(engine.orchestrator.queue_depth().await, 0);
}

#[tokio::test]
async fn test_concurrent_edit_auto_resolves_last_write_wins() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let id = EntityId::new();
    engine
        .remote
        .insert(card(id, "remote edit", "r", T_NEW, false));
    engine
        .store
        .put(&card(id, "local edit", "l", T_OLD, true))
        .await
        .unwrap();

    let kinds: Arc<Mutex<Vec<ConflictKind>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = kinds.clone();
    let _sub = engine.orchestrator.notifier().on_conflict(move |record| {
        sink.lock().unwrap().push(record.kind);
    });

    let report = report(engine.orchestrator.perform_full_sync().await);
    assert_eq!(report.conflicts_detected, 1);
    assert_eq!(report.conflicts_auto_resolved, 1);
    // Two edits of the same record from a common ancestor.
    assert_eq!(
        kinds.lock().unwrap().as_slice(),
        &[ConflictKind::ConcurrentModification]
    );

    // Default policy is last-write-wins; remote is newer here.
    let after = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    match &after {
        EntityPayload::Card(card) => assert_eq!(card.title, "remote edit"),
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(!after.meta().pending_sync);
    assert!(engine.store.pending_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_policy_blocks_entity_until_resolved() {
    let engine = engine_with(
        PolicyEngine::new(Vec::new(), Some(ResolutionStrategy::Manual)),
        Arc::new(FakeAuth::signed_in()),
    )
    .await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let id = EntityId::new();
    engine
        .remote
        .insert(card(id, "remote edit", "r", T_NEW, false));
    engine
        .store
        .put(&card(id, "local edit", "l", T_OLD, true))
        .await
        .unwrap();

    let surfaced: Arc<Mutex<Vec<ConflictId>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = surfaced.clone();
    let _sub = engine.orchestrator.notifier().on_conflict(move |record| {
        sink.lock().unwrap().push(record.id);
    });

    let report = report(engine.orchestrator.perform_full_sync().await);
    assert_eq!(report.conflicts_detected, 1);
    assert_eq!(report.conflicts_auto_resolved, 0);
    let conflict_id = surfaced.lock().unwrap()[0];

    // Writes to the conflicted entity are refused while it is blocked.
    let blocked_op = SyncOperation::new(
        OperationKind::Update,
        card(id, "another edit", "x", T_NEW, true),
        Utc::now(),
    );
    assert!(matches!(
        engine.orchestrator.queue_operation(blocked_op).await,
        Err(SyncError::UnresolvedConflict { .. })
    ));

    // An explicit choice unblocks it.
    engine
        .orchestrator
        .resolve_conflict(&conflict_id, ResolutionStrategy::AcceptRemote)
        .await
        .unwrap();
    let after = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    match &after {
        EntityPayload::Card(card) => assert_eq!(card.title, "remote edit"),
        other => panic!("unexpected payload {other:?}"),
    }
    let retry_op = SyncOperation::new(
        OperationKind::Update,
        card(id, "another edit", "x", T_NEW, true),
        Utc::now(),
    );
    assert!(engine.orchestrator.queue_operation(retry_op).await.is_ok());

    // Resolving again is a no-op.
    engine
        .orchestrator
        .resolve_conflict(&conflict_id, ResolutionStrategy::AcceptLocal)
        .await
        .unwrap();
    match &engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap()
    {
        EntityPayload::Card(card) => assert_eq!(card.title, "another edit"),
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn test_create_new_preserves_both_versions() {
    let engine = engine_with(
        PolicyEngine::new(Vec::new(), Some(ResolutionStrategy::CreateNew)),
        Arc::new(FakeAuth::signed_in()),
    )
    .await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let id = EntityId::new();
    engine
        .remote
        .insert(card(id, "remote edit", "r", T_NEW, false));
    engine
        .store
        .put(&card(id, "local edit", "l", T_OLD, true))
        .await
        .unwrap();

    let report = report(engine.orchestrator.perform_full_sync().await);
    assert_eq!(report.conflicts_detected, 1);
    assert_eq!(report.conflicts_auto_resolved, 1);

    // The original id carries the remote version; the local version
    // continues under a derived id and gets pushed.
    let canonical = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    match &canonical {
        EntityPayload::Card(card) => assert_eq!(card.title, "remote edit"),
        other => panic!("unexpected payload {other:?}"),
    }
    let duplicate_id = id.derive(b"conflict-copy");
    let duplicate = engine
        .store
        .get(EntityType::Card, &duplicate_id)
        .await
        .unwrap()
        .unwrap();
    match &duplicate {
        EntityPayload::Card(card) => assert_eq!(card.title, "local edit"),
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(engine.remote.get(EntityType::Card, &duplicate_id).is_some());
}

#[tokio::test]
async fn test_restore_pending_reblocks_entities() {
    let auth: Arc<dyn IAuthProvider> = Arc::new(FakeAuth::signed_in());
    let manual = PolicyEngine::new(Vec::new(), Some(ResolutionStrategy::Manual));
    let engine = engine_with(manual.clone(), auth.clone()).await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let id = EntityId::new();
    engine
        .remote
        .insert(card(id, "remote edit", "r", T_NEW, false));
    engine
        .store
        .put(&card(id, "local edit", "l", T_OLD, true))
        .await
        .unwrap();
    report(engine.orchestrator.perform_full_sync().await);

    // A fresh orchestrator over the same store reloads the block list.
    let rebuilt = SyncOrchestrator::new(
        engine.store.clone(),
        engine.remote.clone(),
        auth,
        engine.network.clone(),
        engine.queue.clone(),
        Arc::new(BatchDispatcher::new(
            engine.queue.clone(),
            engine.remote.clone(),
            engine.store.clone(),
            engine.network.clone(),
            DispatchConfig::default(),
        )),
        manual,
        StatusNotifier::new(),
        HealthTracker::new(HealthConfig::default()),
    );
    assert_eq!(rebuilt.restore_pending().await.unwrap(), 1);
    let blocked_op = SyncOperation::new(
        OperationKind::Update,
        card(id, "edit", "x", T_NEW, true),
        Utc::now(),
    );
    assert!(matches!(
        rebuilt.queue_operation(blocked_op).await,
        Err(SyncError::UnresolvedConflict { .. })
    ));
}

// ====================================================================
// Status and incremental pulls
// ====================================================================

#[tokio::test]
async fn test_status_reflects_cycle_lifecycle() {
    let engine = engine().await;
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = statuses.clone();
    let _sub = engine.orchestrator.notifier().on_status_change(move |status| {
        sink.lock().unwrap().push(status.clone());
    });

    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));
    let op = SyncOperation::new(OperationKind::Create, new_card("status"), Utc::now());
    engine.orchestrator.queue_operation(op).await.unwrap();
    report(engine.orchestrator.perform_full_sync().await);

    let seen = statuses.lock().unwrap();
    // Replay, post-enqueue, cycle start, cycle end at minimum.
    assert!(seen.len() >= 4);
    assert!(seen.iter().any(|s| s.sync_in_progress));
    let last = seen.last().unwrap();
    assert!(!last.sync_in_progress);
    assert_eq!(last.pending_operations, 0);
    assert!(last.last_sync_time.is_some());
}

#[tokio::test]
async fn test_full_sync_only_pulls_changes_since_last_cycle() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let before = Utc::now() - ChronoDuration::hours(1);
    let old_card = EntityPayload::Card(Card {
        id: EntityId::new(),
        title: "old".to_string(),
        body: String::new(),
        folder_id: None,
        tag_ids: Vec::new(),
        meta: SyncMeta {
            sync_version: 1,
            pending_sync: false,
            updated_at: before,
            is_deleted: false,
        },
    });
    engine.remote.insert(old_card);
    let first = report(engine.orchestrator.perform_full_sync().await);
    assert_eq!(first.pulled, 1);

    // Nothing changed remotely since the watermark: nothing pulled.
    let second = report(engine.orchestrator.perform_full_sync().await);
    assert_eq!(second.pulled, 0);

    let fresh = EntityPayload::Card(Card {
        id: EntityId::new(),
        title: "fresh".to_string(),
        body: String::new(),
        folder_id: None,
        tag_ids: Vec::new(),
        meta: SyncMeta {
            sync_version: 1,
            pending_sync: false,
            updated_at: Utc::now() + ChronoDuration::seconds(1),
            is_deleted: false,
        },
    });
    engine.remote.insert(fresh);
    let third = report(engine.orchestrator.perform_full_sync().await);
    assert_eq!(third.pulled, 1);
}

// ====================================================================
// Version bookkeeping
// ====================================================================

#[tokio::test]
async fn test_equal_version_replay_is_a_no_op() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let payload = new_card("once");
    let id = payload.id();
    let op = SyncOperation::new(OperationKind::Create, payload, Utc::now());
    engine.orchestrator.queue_operation(op).await.unwrap();
    report(engine.orchestrator.perform_incremental_sync().await);
    assert_eq!(engine.orchestrator.queue_depth().await, 0);

    // Re-submitting the accepted record unchanged queues nothing and
    // leaves the replica alone.
    let stored = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    let replay = SyncOperation::new(OperationKind::Update, stored.clone(), Utc::now());
    engine.orchestrator.queue_operation(replay).await.unwrap();
    assert_eq!(engine.orchestrator.queue_depth().await, 0);
    let after = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after, stored);
}

#[tokio::test]
async fn test_accepted_edit_always_advances_version() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let payload = new_card("draft");
    let id = payload.id();
    let op = SyncOperation::new(OperationKind::Create, payload, Utc::now());
    engine.orchestrator.queue_operation(op).await.unwrap();
    report(engine.orchestrator.perform_incremental_sync().await);

    // An edit that still carries the stored version gets stamped past it.
    let stored = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    let stored_version = stored.meta().sync_version;
    let mut edited = stored;
    if let EntityPayload::Card(ref mut c) = edited {
        c.body = "revised".to_string();
    }
    let op = SyncOperation::new(OperationKind::Update, edited, Utc::now());
    engine.orchestrator.queue_operation(op).await.unwrap();

    let after = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.meta().sync_version, stored_version + 1);
    assert!(after.meta().pending_sync);
    assert_eq!(engine.orchestrator.queue_depth().await, 1);
}

#[tokio::test]
async fn test_pull_never_regresses_version() {
    let engine = engine().await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    // The local replica has counted further than the remote copy.
    let id = EntityId::new();
    let mut local = card(id, "settled", "l", T_OLD, false);
    local.meta_mut().sync_version = 5;
    engine.store.put(&local).await.unwrap();
    let mut remote = card(id, "remote edit", "r", T_NEW, false);
    remote.meta_mut().sync_version = 2;
    engine.remote.insert(remote);

    let report = report(engine.orchestrator.perform_full_sync().await);
    assert_eq!(report.pulled, 1);

    let after = engine
        .store
        .get(EntityType::Card, &id)
        .await
        .unwrap()
        .unwrap();
    match &after {
        EntityPayload::Card(card) => assert_eq!(card.title, "remote edit"),
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(after.meta().sync_version, 6);
    assert!(!after.meta().pending_sync);
}

// ====================================================================
// Scheduler
// ====================================================================

#[tokio::test]
async fn test_sign_in_triggers_immediate_full_sync() {
    let auth = Arc::new(FakeAuth::signed_out());
    let engine = engine_with(PolicyEngine::default(), auth.clone()).await;
    engine
        .network
        .set_link(NetworkState::online(QualityTier::FourG));

    let seeded = card(EntityId::new(), "remote note", "body", T_NEW, false);
    engine.remote.insert(seeded.clone());

    // A huge interval so only the sign-in transition can start a cycle.
    let scheduler = Arc::new(SyncScheduler::new(
        engine.orchestrator.clone(),
        engine.network.clone(),
        auth.clone(),
        SyncConfig {
            full_sync_every: 4,
            min_interval_secs: 3600,
        },
    ));
    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    // Let the loop subscribe before the transition fires.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    auth.sign_in();

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let pulled = engine
            .store
            .get(EntityType::Card, &seeded.id())
            .await
            .unwrap();
        if pulled.is_some() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "sign-in never triggered a pull"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    scheduler.shutdown();
    runner.await.unwrap();
}
