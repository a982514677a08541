//! # Sync Agent
//!
//! Orchestrates the connectivity monitor, the poll loop and the push loop
//! around one [`ConfigSyncEngine`].
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  • Spawns the monitor and both sync loops                        │  │
//! │  │  • Keeps SyncStatus current (tier, version, breakers)            │  │
//! │  │  • Emits status events to the UI layer                           │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Connectivity   │  │  Poll loop     │  │   Push loop            │    │
//! │  │ Monitor        │  │                │  │                        │    │
//! │  │                │  │ Green only:    │  │ config.updated ──►     │    │
//! │  │ probes ──► tier│─►│ full once,     │  │ engine.apply_push      │    │
//! │  │ (watch)        │  │ then deltas    │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  STATUS EVENTS:                                                        │
//! │  ──────────────                                                        │
//! │  emit_status       - { tier, version, lastSync, lastError, breakers }  │
//! │  emit_error        - ("circuit 'cloud:config/changes' open...", false) │
//! │  emit_tier_changed - yellow                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed cycle is logged, recorded and emitted. It never stops a loop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use haven_core::{ConfigVersion, ConnectivityTier, TierStabilizer};

use crate::circuit_breaker::BreakerSnapshot;
use crate::config::SyncConfig;
use crate::engine::{ConfigSyncEngine, SyncOutcome};
use crate::error::{SyncError, SyncResult};
use crate::monitor::{ConnectivityMonitor, MonitorHandle, Prober};

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Stabilized connectivity tier.
    pub tier: ConnectivityTier,

    /// Last committed config version.
    pub version: ConfigVersion,

    /// Last cycle that changed the cache.
    pub last_sync: Option<DateTime<Utc>>,

    /// Outcome of the last cycle.
    pub last_outcome: Option<SyncOutcome>,

    /// Last error message (if any).
    pub last_error: Option<String>,

    /// Breakers guarding cloud calls.
    pub breakers: Vec<BreakerSnapshot>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            tier: ConnectivityTier::Red,
            version: ConfigVersion::ZERO,
            last_sync: None,
            last_outcome: None,
            last_error: None,
            breakers: Vec::new(),
        }
    }
}

// =============================================================================
// Event Emitter
// =============================================================================

/// Receives status events for the UI layer.
pub trait SyncEventEmitter: Send + Sync {
    /// Called after every cycle.
    fn emit_status(&self, status: &SyncStatus);

    /// Called when a cycle or a push fails.
    fn emit_error(&self, message: &str, retryable: bool);

    /// Called on every stabilized tier change.
    fn emit_tier_changed(&self, tier: ConnectivityTier);
}

/// No-op emitter for headless runs and tests.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
    fn emit_tier_changed(&self, _tier: ConnectivityTier) {}
}

// =============================================================================
// Sync Agent
// =============================================================================

/// State shared by the spawned loops.
#[derive(Clone)]
struct Shared {
    engine: Arc<ConfigSyncEngine>,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl Shared {
    async fn record_outcome(&self, outcome: SyncOutcome) {
        let mut status = self.status.write().await;
        if outcome.is_applied() {
            status.last_sync = Some(Utc::now());
        }
        status.last_error = None;
        status.last_outcome = Some(outcome);
        status.version = self.engine.current_version();
    }

    async fn record_error(&self, context: &str, err: &SyncError) {
        let message = format!("{}: {}", context, err);
        {
            let mut status = self.status.write().await;
            status.last_error = Some(message.clone());
            status.version = self.engine.current_version();
        }
        self.emitter.emit_error(&message, err.is_retryable() || err.is_circuit_open());
    }

    async fn publish(&self) {
        let breakers = self.engine.cloud().breakers().snapshots().await;
        let snapshot = {
            let mut status = self.status.write().await;
            status.breakers = breakers;
            status.clone()
        };
        self.emitter.emit_status(&snapshot);
    }
}

/// Main sync agent.
pub struct SyncAgent {
    config: Arc<SyncConfig>,
    shared: Shared,
    prober: Arc<dyn Prober>,

    monitor: Option<MonitorHandle>,
    trigger_tx: Option<mpsc::Sender<()>>,
    shutdown_txs: Vec<mpsc::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncAgent {
    /// Creates a new sync agent.
    pub fn new(config: SyncConfig, engine: Arc<ConfigSyncEngine>, prober: Arc<dyn Prober>) -> Self {
        Self::with_emitter(config, engine, prober, Arc::new(NoOpEmitter))
    }

    /// Creates a new sync agent with a custom event emitter.
    pub fn with_emitter(
        config: SyncConfig,
        engine: Arc<ConfigSyncEngine>,
        prober: Arc<dyn Prober>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let status = SyncStatus {
            version: engine.current_version(),
            ..Default::default()
        };

        SyncAgent {
            config: Arc::new(config),
            shared: Shared {
                engine,
                status: Arc::new(RwLock::new(status)),
                emitter,
            },
            prober,
            monitor: None,
            trigger_tx: None,
            shutdown_txs: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.shared.status.read().await.clone()
    }

    /// Current stabilized tier, Red before `start`.
    pub fn tier(&self) -> ConnectivityTier {
        self.monitor
            .as_ref()
            .map_or(ConnectivityTier::Red, MonitorHandle::tier)
    }

    pub fn engine(&self) -> &Arc<ConfigSyncEngine> {
        &self.shared.engine
    }

    /// Starts the monitor, the push loop and the poll loop.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.monitor.is_some() {
            return Err(SyncError::Internal("Sync agent already started".into()));
        }

        self.config.validate()?;

        info!(
            device_id = %self.config.device_id(),
            cloud = %self.config.cloud.base_url,
            version = self.shared.engine.current_version().value(),
            "Starting sync agent"
        );

        let monitor = ConnectivityMonitor::spawn(
            self.prober.clone(),
            TierStabilizer::new(self.config.connectivity.downgrade_after),
            self.config.connectivity.probe_interval(),
        );

        let (push_shutdown_tx, push_shutdown_rx) = mpsc::channel(1);
        self.tasks.push(tokio::spawn(Self::push_loop(
            self.shared.clone(),
            push_shutdown_rx,
        )));

        let (poll_shutdown_tx, poll_shutdown_rx) = mpsc::channel(1);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        self.tasks.push(tokio::spawn(Self::poll_loop(
            self.shared.clone(),
            monitor.subscribe(),
            self.config.sync.delta_interval(),
            trigger_rx,
            poll_shutdown_rx,
        )));

        self.shutdown_txs = vec![push_shutdown_tx, poll_shutdown_tx];
        self.trigger_tx = Some(trigger_tx);
        self.monitor = Some(monitor);

        info!("Sync agent started");
        Ok(())
    }

    /// Requests a full sync on the next Green cycle.
    pub async fn trigger_full_sync(&self) -> SyncResult<()> {
        let tx = self
            .trigger_tx
            .as_ref()
            .ok_or_else(|| SyncError::Internal("Sync agent not started".into()))?;

        // A full channel already holds a pending trigger.
        match tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(SyncError::ShuttingDown),
        }
    }

    /// Stops every loop and waits for them to finish.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down sync agent");

        for tx in self.shutdown_txs.drain(..) {
            let _ = tx.send(()).await;
        }

        if let Some(monitor) = self.monitor.take() {
            monitor.shutdown().await;
        }

        self.trigger_tx = None;

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Sync task ended abnormally");
            }
        }

        info!("Sync agent stopped");
        Ok(())
    }

    // =========================================================================
    // Loops
    // =========================================================================

    /// Runs a full or delta sync whenever the tier is Green.
    async fn poll_loop(
        shared: Shared,
        mut tier_rx: watch::Receiver<ConnectivityTier>,
        interval: Duration,
        mut trigger_rx: mpsc::Receiver<()>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        // The first Green transition starts syncing, ticks take over after.
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut full_done = false;
        let mut full_requested = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = tier_rx.changed() => {
                    if changed.is_err() {
                        debug!("Tier channel closed");
                        break;
                    }
                    let tier = *tier_rx.borrow_and_update();
                    shared.status.write().await.tier = tier;
                    shared.emitter.emit_tier_changed(tier);
                }
                Some(()) = trigger_rx.recv() => {
                    info!("Full sync requested");
                    full_requested = true;
                }
                _ = shutdown_rx.recv() => break,
            }

            let tier = *tier_rx.borrow();
            if !tier.allows_full_sync() {
                debug!(tier = %tier, "Cloud not reachable, sync cycle skipped");
                continue;
            }

            let full = full_requested
                || !full_done
                || shared.engine.current_version() == ConfigVersion::ZERO;

            let cycle = async {
                if full {
                    shared.engine.sync_full().await
                } else {
                    shared.engine.sync_delta().await
                }
            };

            // Shutdown drops the in-flight cycle, cancelling pending retries.
            let result = tokio::select! {
                result = cycle => result,
                _ = shutdown_rx.recv() => break,
            };

            match result {
                Ok(outcome) => {
                    if full && !matches!(outcome, SyncOutcome::Skipped { .. }) {
                        full_done = true;
                        full_requested = false;
                    }
                    shared.record_outcome(outcome).await;
                }
                Err(e) => {
                    let context = if full { "Full sync failed" } else { "Delta sync failed" };
                    error!(error = %e, "{}", context);
                    shared.record_error(context, &e).await;
                }
            }

            shared.publish().await;
        }

        info!("Poll loop stopped");
    }

    /// Feeds pushed batches to the engine.
    async fn push_loop(shared: Shared, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut updates = match shared.engine.subscribe_push().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "Push updates unavailable, relying on polling");
                return;
            }
        };

        info!(topic = %shared.engine.paths().topic, "Listening for pushed config updates");

        loop {
            tokio::select! {
                payload = updates.recv() => {
                    let Some(payload) = payload else {
                        warn!("Push subscription closed");
                        break;
                    };

                    match shared.engine.apply_push(&payload).await {
                        Ok(outcome) => shared.record_outcome(outcome).await,
                        Err(e) => {
                            error!(error = %e, "Failed to apply pushed update");
                            shared.record_error("Push apply failed", &e).await;
                        }
                    }
                    shared.publish().await;
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("Push loop stopped");
    }
}
