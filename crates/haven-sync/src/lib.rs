//! # haven-sync: Offline Resilience and Config Sync for Haven POS
//!
//! This crate owns every outbound call to the cloud and decides how the rest
//! of the terminal behaves when those calls stop working.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Agent Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncAgent (Main Orchestrator)               │  │
//! │  │                                                                  │  │
//! │  │  Spawned once by the haven-agent binary                          │  │
//! │  │  Poll loop (Green only) + push loop + status events              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Connectivity   │  │ConfigSyncEngine│  │  ConfigStore           │    │
//! │  │ Monitor        │  │                │  │                        │    │
//! │  │ probes, resolve│  │ full / delta / │  │ MemoryStore or the     │    │
//! │  │ TierStabilizer │  │ push, one lock │  │ SQLite cache (haven-db)│    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │                                          │
//! │  ┌───────────────────────────▼─────────────────────────────────────┐   │
//! │  │ GuardedCloud: BreakerRegistry ─► RetryExecutor ─► CloudConnection│  │
//! │  │                                                   HTTP + push WS │  │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  TIERS:                                                                │
//! │  GREEN cloud  •  YELLOW service host  •  ORANGE local agents  •  RED   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Resilience primitives
//! - [`retry`] - Jittered exponential backoff executor
//! - [`circuit_breaker`] - Lazy-recovery breaker and the named `BreakerRegistry`
//!
//! ### Cloud access
//! - [`cloud`] - `CloudConnection` trait and the `GuardedCloud` wrapper
//! - [`http`] - `reqwest` implementation
//! - [`transport`] - WebSocket push client with reconnection
//! - [`protocol`] - Push socket frames
//!
//! ### Sync
//! - [`store`] - `ConfigStore` trait, in-memory and SQLite implementations
//! - [`engine`] - `ConfigSyncEngine`
//! - [`monitor`] - Reachability probing and tier publication
//! - [`agent`] - `SyncAgent` scheduler
//!
//! ### Ambient
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use haven_sync::{SyncAgent, SyncConfig};
//!
//! let config = SyncConfig::load(None)?;
//! let mut agent = SyncAgent::new(config, engine, prober);
//! agent.start().await?;
//!
//! let status = agent.status().await;
//! println!("tier: {}, version: {}", status.tier, status.version);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod circuit_breaker;
pub mod retry;

pub mod cloud;
pub mod http;
pub mod protocol;
pub mod transport;

pub mod agent;
pub mod engine;
pub mod monitor;
pub mod store;

pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{NoOpEmitter, SyncAgent, SyncEventEmitter, SyncStatus};
pub use circuit_breaker::{
    BreakerConfig, BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker, CircuitOpen,
};
pub use cloud::{CloudConnection, GuardedCloud};
pub use config::SyncConfig;
pub use engine::{ConfigSyncEngine, SkipReason, SyncOutcome, SyncPaths};
pub use error::{SyncError, SyncResult};
pub use http::HttpCloudConnection;
pub use monitor::{ConnectivityMonitor, HttpProber, MonitorHandle, Prober};
pub use retry::{RetryExecutor, RetryPolicy};
pub use store::{ConfigStore, MemoryStore};
pub use transport::{ConnectionState, PushConfig, PushHandle, PushTransport};
