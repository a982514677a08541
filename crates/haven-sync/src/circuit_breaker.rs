//! # Circuit Breaker
//!
//! Per-resource failure isolation. Once a resource has failed often enough the
//! breaker stops calling it and fails fast until a recovery window passes.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Circuit Breaker States                             │
//! │                                                                         │
//! │               failure_count >= failure_threshold                        │
//! │  ┌────────┐ ───────────────────────────────────────► ┌────────┐        │
//! │  │ CLOSED │                                          │  OPEN  │        │
//! │  │        │ ◄──────────────┐                         │        │        │
//! │  └────────┘                │                         └───┬────┘        │
//! │   success: count - 1       │                             │  ▲          │
//! │   failure: count + 1       │ half_open_attempts          │  │ any      │
//! │                            │ reaches max                 │  │ failure  │
//! │                            │ (count reset to 0)          │  │          │
//! │                            │                             ▼  │          │
//! │                          ┌─┴────────┐   next state() after  │          │
//! │                          │HALF-OPEN │ ◄── recovery_time ────┘          │
//! │                          │          │     has elapsed                  │
//! │                          └──────────┘     (no background timer)        │
//! │                                                                         │
//! │  OPEN: execute() returns CircuitOpen without calling the operation     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Clock
//! Elapsed time is read from `tokio::time::Instant`, so tests drive recovery
//! with a paused runtime and `tokio::time::advance`.
//!
//! ## Registry
//! [`BreakerRegistry`] is built once at startup and passed by reference. It
//! hands out one shared breaker per resource name for the process lifetime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerSettings;

// =============================================================================
// Types
// =============================================================================

/// Synthetic fast-fail error produced by an open breaker.
///
/// Callers convert it into their own error type through `From<CircuitOpen>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpen {
    /// Breaker (resource) name.
    pub name: String,

    /// Time left until the breaker lets a trial call through.
    pub retry_in: Duration,
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls fail fast.
    Open,
    /// Trial calls are let through to probe recovery.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failure count at which a closed breaker opens.
    pub failure_threshold: u32,

    /// How long an open breaker waits before allowing trial calls.
    pub recovery_time: Duration,

    /// Successful trial calls needed to close again.
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig::from(&BreakerSettings::default())
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        BreakerConfig {
            failure_threshold: settings.failure_threshold.max(1),
            recovery_time: Duration::from_millis(settings.recovery_time_ms),
            half_open_max_attempts: settings.half_open_max_attempts.max(1),
        }
    }
}

/// Point-in-time view of a breaker, for status screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub half_open_attempts: u32,
}

// =============================================================================
// Circuit Breaker
// =============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    half_open_attempts: u32,
}

/// A circuit breaker guarding one logical resource.
///
/// All transitions happen under one mutex, so concurrent callers sharing the
/// breaker never lose updates to the counters.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        CircuitBreaker {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_time: None,
                half_open_attempts: 0,
            }),
        }
    }

    /// Returns the resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the thresholds this breaker was created with.
    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Returns the current state, moving Open to HalfOpen first if the
    /// recovery window has passed.
    pub async fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().await;
        self.refresh(&mut inner)
    }

    /// Runs `operation` unless the breaker is open.
    ///
    /// The operation's result is returned unchanged and its outcome is fed
    /// through the transition rules. A fast-fail never counts as a failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        E: From<CircuitOpen>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if self.refresh(&mut inner) == BreakerState::Open {
                let retry_in = self.retry_in(&inner);
                debug!(breaker = %self.name, retry_in_ms = retry_in.as_millis() as u64, "Circuit open, failing fast");
                return Err(E::from(CircuitOpen {
                    name: self.name.clone(),
                    retry_in,
                }));
            }
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success().await,
            Err(_) => self.record_failure().await,
        }

        result
    }

    /// Applies the success transition.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;

        match self.refresh(&mut inner) {
            BreakerState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            BreakerState::HalfOpen => {
                inner.half_open_attempts += 1;
                if inner.half_open_attempts >= self.config.half_open_max_attempts {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.half_open_attempts = 0;
                    info!(breaker = %self.name, "Circuit closed");
                }
            }
            // A call admitted before the breaker opened; the open window stands.
            BreakerState::Open => {}
        }
    }

    /// Applies the failure transition.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        match self.refresh(&mut inner) {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.last_failure_time = Some(now);
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        recovery_ms = self.config.recovery_time.as_millis() as u64,
                        "Circuit opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.last_failure_time = Some(now);
                inner.half_open_attempts = 0;
                warn!(breaker = %self.name, "Trial call failed, circuit reopened");
            }
            BreakerState::Open => {
                inner.last_failure_time = Some(now);
            }
        }
    }

    /// Returns a snapshot of the current state and counters.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock().await;
        let state = self.refresh(&mut inner);

        BreakerSnapshot {
            name: self.name.clone(),
            state,
            failure_count: inner.failure_count,
            half_open_attempts: inner.half_open_attempts,
        }
    }

    /// Forces the breaker closed with cleared counters.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.half_open_attempts = 0;
        info!(breaker = %self.name, "Circuit reset");
    }

    /// Lazy Open → HalfOpen check. Must be called with the lock held.
    fn refresh(&self, inner: &mut BreakerInner) -> BreakerState {
        if inner.state == BreakerState::Open {
            let recovered = inner
                .last_failure_time
                .map_or(true, |t| t.elapsed() >= self.config.recovery_time);

            if recovered {
                inner.state = BreakerState::HalfOpen;
                inner.half_open_attempts = 0;
                info!(breaker = %self.name, "Circuit half-open, allowing trial calls");
            }
        }

        inner.state
    }

    fn retry_in(&self, inner: &BreakerInner) -> Duration {
        inner
            .last_failure_time
            .map(|t| self.config.recovery_time.saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Name-keyed breakers shared by every call site of a resource.
///
/// Breakers are created on first use and never removed.
#[derive(Debug)]
pub struct BreakerRegistry {
    default_config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Creates an empty registry whose breakers default to `default_config`.
    pub fn new(default_config: BreakerConfig) -> Self {
        BreakerRegistry {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `name`, creating it with the default config.
    pub async fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with(name, self.default_config).await
    }

    /// Returns the breaker for `name`, creating it with `config`.
    ///
    /// `config` only applies if this call creates the breaker.
    pub async fn get_with(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(name) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = %name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    /// Snapshots of every breaker, ordered by name.
    pub async fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Number of breakers created so far.
    pub async fn len(&self) -> usize {
        self.breakers.read().await.len()
    }

    /// True if no breaker has been created yet.
    pub async fn is_empty(&self) -> bool {
        self.breakers.read().await.is_empty()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        BreakerRegistry::new(BreakerConfig::default())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            recovery_time: Duration::from_secs(10),
            half_open_max_attempts: 2,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), SyncError> {
        breaker
            .execute(|| async { Err(SyncError::ConnectionFailed("down".into())) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), SyncError> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new("cloud:config/changes", config());
        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state().await, BreakerState::Open);

        let calls = AtomicU32::new(0);
        let result: Result<(), SyncError> = breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_until_recovery_elapses() {
        let breaker = CircuitBreaker::new("r", config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(breaker.state().await, BreakerState::Open);
        match succeed(&breaker).await {
            Err(SyncError::CircuitOpen { retry_in, .. }) => {
                assert!(retry_in <= Duration::from_secs(1));
            }
            other => panic!("expected fast fail, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state().await, BreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successes_erode_failures() {
        let breaker = CircuitBreaker::new("r", config());
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.snapshot().await.failure_count, 1);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state().await, BreakerState::Closed);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state().await, BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_count_never_negative() {
        let breaker = CircuitBreaker::new("r", config());
        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.snapshot().await.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_then_failure_reopens() {
        let breaker = CircuitBreaker::new("r", config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.snapshot().await.half_open_attempts, 1);

        let _ = fail(&breaker).await;
        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.state, BreakerState::Open);
        assert_eq!(snapshot.half_open_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_max_attempts() {
        let breaker = CircuitBreaker::new("r", config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();

        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_error_passes_through() {
        let breaker = CircuitBreaker::new("r", config());
        let result: Result<(), SyncError> = breaker
            .execute(|| async { Err(SyncError::Unauthorized("key".into())) })
            .await;
        assert!(matches!(result, Err(SyncError::Unauthorized(ref m)) if m == "key"));
    }

    #[tokio::test]
    async fn test_registry_shares_breakers_by_name() {
        let registry = BreakerRegistry::new(config());

        let a = registry.get("cloud:config/full").await;
        let b = registry.get("cloud:config/full").await;
        assert!(Arc::ptr_eq(&a, &b));

        let other = BreakerConfig {
            failure_threshold: 99,
            ..config()
        };
        let c = registry.get_with("cloud:config/full", other).await;
        assert_eq!(c.config().failure_threshold, 3);

        registry.get("cloud:health").await;
        let names: Vec<String> = registry
            .snapshots()
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["cloud:config/full", "cloud:health"]);
    }

    #[tokio::test]
    async fn test_reset_closes_breaker() {
        let breaker = CircuitBreaker::new("r", config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        breaker.reset().await;
        assert_eq!(breaker.state().await, BreakerState::Closed);
        succeed(&breaker).await.unwrap();
    }
}
