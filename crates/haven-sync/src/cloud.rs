//! # Cloud Connection
//!
//! The capability the sync engine needs from the cloud, and the guard that
//! wraps every call in a circuit breaker and a retry executor.
//!
//! ## Call Boundary
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       GuardedCloud::get(path)                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ BreakerRegistry["cloud:<path>"].execute(                         │  │
//! │  │   ┌──────────────────────────────────────────────────────────┐   │  │
//! │  │   │ RetryExecutor.run(                                       │   │  │
//! │  │   │   CloudConnection::get(path, query)  ◄── per-call timeout│   │  │
//! │  │   │ )                                                        │   │  │
//! │  │   └──────────────────────────────────────────────────────────┘   │  │
//! │  │ )                                                                │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  Breaker open    ──► SyncError::CircuitOpen, nothing sent              │
//! │  Retries used up ──► last error, counted once by the breaker           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine never retries on its own. Everything above happens at this
//! boundary.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::circuit_breaker::BreakerRegistry;
use crate::error::SyncResult;
use crate::retry::{RetryExecutor, RetryPolicy};

// =============================================================================
// Capability Trait
// =============================================================================

/// What the sync engine needs from the cloud.
///
/// Any transport works: the shipped implementation is HTTP for requests
/// plus a WebSocket for pushes, tests use scripted fakes.
#[async_trait]
pub trait CloudConnection: Send + Sync {
    /// Returns true when the cloud is believed reachable.
    async fn is_connected(&self) -> bool;

    /// Issues a GET and returns the decoded JSON body.
    ///
    /// Fails on transport errors and non-success statuses.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> SyncResult<Value>;

    /// Subscribes to a push topic. Each delivered payload arrives on the
    /// returned receiver; the subscription lives as long as the receiver.
    async fn subscribe(&self, topic: &str) -> SyncResult<mpsc::Receiver<Value>>;
}

// =============================================================================
// Guarded Cloud
// =============================================================================

/// A `CloudConnection` behind per-path circuit breakers and retries.
#[derive(Clone)]
pub struct GuardedCloud {
    cloud: Arc<dyn CloudConnection>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryExecutor,
}

impl GuardedCloud {
    pub fn new(cloud: Arc<dyn CloudConnection>, breakers: Arc<BreakerRegistry>, policy: RetryPolicy) -> Self {
        GuardedCloud {
            cloud,
            breakers,
            retry: RetryExecutor::new(policy),
        }
    }

    /// Name of the breaker guarding `path`.
    pub fn breaker_name(path: &str) -> String {
        format!("cloud:{}", path)
    }

    /// GET through the breaker for `path`, retrying inside it.
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> SyncResult<Value> {
        let breaker = self.breakers.get(&Self::breaker_name(path)).await;
        let cloud = &self.cloud;
        let retry = &self.retry;

        breaker
            .execute(|| retry.run(|| cloud.get(path, query)))
            .await
    }

    pub async fn is_connected(&self) -> bool {
        self.cloud.is_connected().await
    }

    pub async fn subscribe(&self, topic: &str) -> SyncResult<mpsc::Receiver<Value>> {
        self.cloud.subscribe(topic).await
    }

    /// The registry holding this cloud's breakers.
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }
}
