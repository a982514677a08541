//! # Connectivity Monitor
//!
//! Probes the network topology on an interval and publishes the stabilized
//! connectivity tier.
//!
//! ## Probe Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   every probe_interval                                                 │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   ┌──────────┐  ReachabilityProbe  ┌─────────┐  tier  ┌──────────────┐  │
//! │   │  Prober  │ ──────────────────► │ resolve │ ─────► │TierStabilizer│  │
//! │   │ cloud    │                     └─────────┘        │ N to go down │  │
//! │   │ host     │                                        │ 1 to go up   │  │
//! │   │ agent    │                                        └──────┬───────┘  │
//! │   └──────────┘                                               │          │
//! │                                                   changed?   ▼          │
//! │                                          watch::Sender<ConnectivityTier>│
//! │                                                   │                     │
//! │                         ┌─────────────────────────┼──────────────┐      │
//! │                         ▼                         ▼              ▼      │
//! │                    SyncAgent                 status UI      ...         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The published tier starts at Red until the first probe completes.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use url::Url;

use haven_core::{resolve, ConnectivityTier, ReachabilityProbe, TierStabilizer};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::http::normalize_base;

// =============================================================================
// Probers
// =============================================================================

/// Produces one reachability snapshot per call.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self) -> ReachabilityProbe;
}

/// Probes over HTTP. Any response, whatever its status, counts as reachable.
pub struct HttpProber {
    client: reqwest::Client,
    cloud_health: Url,
    service_host: Option<Url>,
    local_agent: Option<Url>,
}

impl HttpProber {
    pub fn new(
        timeout: Duration,
        cloud_health: Url,
        service_host: Option<Url>,
        local_agent: Option<Url>,
    ) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build probe client: {}", e)))?;

        Ok(HttpProber {
            client,
            cloud_health,
            service_host,
            local_agent,
        })
    }

    /// Builds a prober from the `[cloud]` and `[connectivity]` sections.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let cloud_health = normalize_base(&config.cloud.base_url)?
            .join(config.cloud.health_path.trim_start_matches('/'))?;

        let parse = |raw: &Option<String>| -> SyncResult<Option<Url>> {
            raw.as_deref().map(Url::parse).transpose().map_err(SyncError::from)
        };

        Self::new(
            config.connectivity.probe_timeout(),
            cloud_health,
            parse(&config.connectivity.service_host_url)?,
            parse(&config.connectivity.local_agent_url)?,
        )
    }

    async fn answers(&self, url: Option<&Url>) -> bool {
        let Some(url) = url else {
            return false;
        };

        match self.client.get(url.clone()).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %url, error = %e, "Probe target unreachable");
                false
            }
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self) -> ReachabilityProbe {
        let (cloud, host, agent) = tokio::join!(
            self.answers(Some(&self.cloud_health)),
            self.answers(self.service_host.as_ref()),
            self.answers(self.local_agent.as_ref()),
        );
        ReachabilityProbe::new(cloud, host, agent)
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Handle to a running monitor.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    tier_rx: watch::Receiver<ConnectivityTier>,
    shutdown_tx: mpsc::Sender<()>,
}

impl MonitorHandle {
    /// Current stabilized tier.
    pub fn tier(&self) -> ConnectivityTier {
        *self.tier_rx.borrow()
    }

    /// A receiver that observes every tier change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityTier> {
        self.tier_rx.clone()
    }

    /// Stops the probe loop.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Background probe loop.
pub struct ConnectivityMonitor;

impl ConnectivityMonitor {
    /// Spawns the probe loop. The first probe runs immediately.
    pub fn spawn(
        prober: Arc<dyn Prober>,
        mut stabilizer: TierStabilizer,
        interval: Duration,
    ) -> MonitorHandle {
        let (tier_tx, tier_rx) = watch::channel(ConnectivityTier::Red);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let probe = prober.probe().await;
                        let resolved = resolve(&probe);
                        let tier = stabilizer.observe_tier(resolved);
                        let previous = *tier_tx.borrow();

                        if tier != previous {
                            info!(from = %previous, to = %tier, "Connectivity tier changed");
                            tier_tx.send_replace(tier);
                        } else if resolved != tier {
                            debug!(
                                held = %tier,
                                resolved = %resolved,
                                pending = stabilizer.pending_downgrades(),
                                "Downgrade pending"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Connectivity monitor stopped");
                        break;
                    }
                }
            }
        });

        MonitorHandle {
            tier_rx,
            shutdown_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedProber {
        script: Mutex<VecDeque<ReachabilityProbe>>,
        probes: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(tiers: &[(bool, bool, bool)]) -> Arc<Self> {
            Arc::new(ScriptedProber {
                script: Mutex::new(
                    tiers
                        .iter()
                        .map(|&(c, h, a)| ReachabilityProbe::new(c, h, a))
                        .collect(),
                ),
                probes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self) -> ReachabilityProbe {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(ReachabilityProbe::unreachable)
        }
    }

    const GREEN: (bool, bool, bool) = (true, true, true);
    const YELLOW: (bool, bool, bool) = (false, true, true);
    const RED: (bool, bool, bool) = (false, false, false);

    #[tokio::test(start_paused = true)]
    async fn test_first_probe_is_published() {
        let prober = ScriptedProber::new(&[GREEN; 4]);
        let handle = ConnectivityMonitor::spawn(prober, TierStabilizer::new(3), Duration::from_secs(30));
        let mut rx = handle.subscribe();

        assert_eq!(handle.tier(), ConnectivityTier::Red);
        rx.changed().await.unwrap();
        assert_eq!(handle.tier(), ConnectivityTier::Green);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_downgrade_waits_for_consecutive_probes() {
        let prober = ScriptedProber::new(&[GREEN, YELLOW, YELLOW]);
        let handle = ConnectivityMonitor::spawn(
            prober.clone(),
            TierStabilizer::new(2),
            Duration::from_secs(30),
        );
        let mut rx = handle.subscribe();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectivityTier::Green);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(prober.probes.load(Ordering::SeqCst), 2);
        assert_eq!(handle.tier(), ConnectivityTier::Green);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectivityTier::Yellow);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_is_immediate() {
        let prober = ScriptedProber::new(&[RED, GREEN, GREEN]);
        let handle = ConnectivityMonitor::spawn(prober, TierStabilizer::new(5), Duration::from_secs(30));
        let mut rx = handle.subscribe();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectivityTier::Green);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_probing() {
        let prober = ScriptedProber::new(&[]);
        let handle = ConnectivityMonitor::spawn(
            prober.clone(),
            TierStabilizer::immediate(),
            Duration::from_secs(10),
        );

        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let after_shutdown = prober.probes.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(prober.probes.load(Ordering::SeqCst), after_shutdown);
    }
}
