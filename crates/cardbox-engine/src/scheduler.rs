//! Background sync scheduler
//!
//! Runs the orchestrator on an interval derived from network quality:
//! good links sync every 30 seconds, degraded links back off to minutes.
//! Every `full_sync_every`-th cycle is a full sync (pull + push); the
//! cycles in between are push-only. A sync can also be requested out of
//! band, which wakes the loop immediately, and a sign-in while the loop
//! is running triggers an immediate full sync.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, info};

use cardbox_core::config::SyncConfig;
use cardbox_core::ports::{IAuthProvider, INetworkMonitor};

use crate::orchestrator::{SyncOrchestrator, SyncOutcome};

/// Drives periodic sync cycles until shut down
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    network: Arc<dyn INetworkMonitor>,
    auth: Arc<dyn IAuthProvider>,
    config: SyncConfig,
    sync_now: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
}

impl SyncScheduler {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        network: Arc<dyn INetworkMonitor>,
        auth: Arc<dyn IAuthProvider>,
        config: SyncConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            orchestrator,
            network,
            auth,
            config,
            sync_now: Arc::new(Notify::new()),
            shutdown_tx,
        }
    }

    /// Wakes the run loop for an immediate cycle
    pub fn request_sync(&self) {
        self.sync_now.notify_one();
    }

    /// Signals the run loop to exit after the current cycle
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Interval until the next scheduled cycle, floored by configuration
    fn next_interval(&self) -> Duration {
        let floor = Duration::from_secs(self.config.min_interval_secs);
        self.network.adaptive_sync_interval().max(floor)
    }

    /// The scheduler loop. Runs until [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut auth_rx = self.auth.subscribe();
        auth_rx.mark_unchanged();
        let mut cycle: u64 = 0;
        info!(
            min_interval_secs = self.config.min_interval_secs,
            full_sync_every = self.config.full_sync_every,
            "sync scheduler started"
        );

        loop {
            let interval = self.next_interval();
            debug!(interval_secs = interval.as_secs(), "next sync cycle scheduled");

            let mut force_full = false;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.sync_now.notified() => {
                    debug!("sync requested out of band");
                }
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    if !auth_rx.borrow_and_update().is_authenticated() {
                        debug!("user signed out, holding off sync");
                        continue;
                    }
                    info!("user signed in, running full sync");
                    force_full = true;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            cycle += 1;
            let full = force_full
                || (self.config.full_sync_every > 0
                    && cycle % u64::from(self.config.full_sync_every) == 0);
            let outcome = if full {
                self.orchestrator.perform_full_sync().await
            } else {
                self.orchestrator.perform_incremental_sync().await
            };
            match outcome {
                SyncOutcome::Completed(report) => {
                    debug!(
                        full = report.full,
                        pushed = report.pushed,
                        pulled = report.pulled,
                        "scheduled cycle completed"
                    );
                }
                SyncOutcome::AlreadyRunning => {
                    debug!("scheduled cycle skipped, sync already running");
                }
                SyncOutcome::Skipped(reason) => {
                    debug!(?reason, "scheduled cycle skipped");
                }
            }
        }
        info!("sync scheduler stopped");
    }
}
