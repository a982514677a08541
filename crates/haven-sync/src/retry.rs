//! # Retry Executor
//!
//! Runs a fallible async operation with exponentially backed-off, jittered
//! retries.
//!
//! ## Delay Schedule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Backoff Before Attempt n+1                         │
//! │                                                                         │
//! │  capped = min(base * 2^(n-1), max)                                     │
//! │  jitter = capped * jitter_factor * U(-1, 1)                            │
//! │  delay  = max(0, floor(capped + jitter))                               │
//! │                                                                         │
//! │  base = 500ms, max = 30s, jitter = 0.2                                 │
//! │                                                                         │
//! │  attempt 1 fails ──► ~500ms   (400 .. 600)                             │
//! │  attempt 2 fails ──► ~1s      (800 .. 1200)                            │
//! │  attempt 3 fails ──► ~2s      (1600 .. 2400)                           │
//! │  ...                                                                    │
//! │  attempt 7 fails ──► ~30s     (capped, 24000 .. 36000)                 │
//! │                                                                         │
//! │  should_retry(err, n) == false ──► fail now with err                   │
//! │  attempt == max_attempts       ──► fail now with err (never wrapped)   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The executor holds no mutable state. Every `run` is independent and
//! dropping the returned future cancels both the in-flight attempt and any
//! pending sleep.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::SyncError;

/// Predicate deciding whether an error is worth another attempt.
pub type ShouldRetry<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;

/// Observer called before each backoff sleep with `(error, attempt, delay)`.
pub type OnRetry<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

// =============================================================================
// Retry Policy
// =============================================================================

/// How many times to try and how long to wait in between.
pub struct RetryPolicy<E = SyncError> {
    /// Total attempts including the first. 0 is treated as 1.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Upper bound on the pre-jitter delay.
    pub max_delay: Duration,

    /// Fraction of the capped delay used as jitter amplitude, in [0, 1].
    pub jitter_factor: f64,

    should_retry: Option<ShouldRetry<E>>,
    on_retry: Option<OnRetry<E>>,
}

impl<E> RetryPolicy<E> {
    /// Creates a policy with no predicate and no observer.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            should_retry: None,
            on_retry: None,
        }
    }

    /// Sets the retry predicate.
    pub fn with_should_retry(mut self, f: impl Fn(&E, u32) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Some(Arc::new(f));
        self
    }

    /// Sets the retry observer.
    pub fn with_on_retry(mut self, f: impl Fn(&E, u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed), with fresh
    /// random jitter.
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.backoff_delay(attempt, unit)
    }

    /// Deterministic form of [`calculate_backoff_delay`](Self::calculate_backoff_delay).
    ///
    /// `unit` is the jitter sample in [-1, 1].
    pub fn backoff_delay(&self, attempt: u32, unit: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let capped = (base_ms * 2f64.powi(exponent)).min(max_ms);
        let jitter = capped * self.jitter_factor * unit.clamp(-1.0, 1.0);
        let delay = (capped + jitter).floor().max(0.0);

        Duration::from_millis(delay as u64)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl RetryPolicy<SyncError> {
    /// Policy for cloud calls: settings from config, transient errors only.
    pub fn for_cloud(settings: &RetrySettings) -> Self {
        RetryPolicy::from(settings).with_should_retry(|err: &SyncError, _| err.is_retryable())
    }
}

impl<E> From<&RetrySettings> for RetryPolicy<E> {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy::new(
            settings.max_attempts,
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.jitter_factor,
        )
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter_factor: self.jitter_factor,
            should_retry: self.should_retry.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter_factor", &self.jitter_factor)
            .field("should_retry", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

// =============================================================================
// Retry Executor
// =============================================================================

/// Runs operations under a [`RetryPolicy`].
///
/// ## Example
/// ```rust,ignore
/// let executor = RetryExecutor::new(RetryPolicy::for_cloud(&config.retry));
/// let body = executor.run(|| cloud.get("config/full", &[])).await?;
/// ```
#[derive(Debug)]
pub struct RetryExecutor<E = SyncError> {
    policy: RetryPolicy<E>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        RetryExecutor {
            policy: self.policy.clone(),
        }
    }
}

impl<E: fmt::Display> RetryExecutor<E> {
    /// Creates an executor for `policy`.
    pub fn new(policy: RetryPolicy<E>) -> Self {
        RetryExecutor { policy }
    }

    /// Returns the policy.
    pub fn policy(&self) -> &RetryPolicy<E> {
        &self.policy
    }

    /// Runs `operation` until it succeeds, the predicate rejects an error, or
    /// the attempts run out. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 1u32;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if let Some(should_retry) = &self.policy.should_retry {
                if !should_retry(&err, attempt) {
                    debug!(attempt, error = %err, "Error is not retryable");
                    return Err(err);
                }
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "Retry attempts exhausted");
                return Err(err);
            }

            let delay = self.policy.calculate_backoff_delay(attempt);

            if let Some(on_retry) = &self.policy.on_retry {
                on_retry(&err, attempt, delay);
            }

            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, backing off"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn policy(max_attempts: u32) -> RetryPolicy<SyncError> {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(100),
            Duration::from_millis(1_000),
            0.0,
        )
    }

    #[test]
    fn test_backoff_without_jitter() {
        let p = policy(5);
        assert_eq!(p.backoff_delay(1, 0.0), Duration::from_millis(100));
        assert_eq!(p.backoff_delay(2, 0.0), Duration::from_millis(200));
        assert_eq!(p.backoff_delay(3, 0.0), Duration::from_millis(400));
        assert_eq!(p.backoff_delay(5, 0.0), Duration::from_millis(1_000));
        assert_eq!(p.backoff_delay(40, 0.0), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let p: RetryPolicy<SyncError> = RetryPolicy::new(
            10,
            Duration::from_millis(500),
            Duration::from_millis(30_000),
            0.2,
        );

        assert_eq!(p.backoff_delay(1, 1.0), Duration::from_millis(600));
        assert_eq!(p.backoff_delay(1, -1.0), Duration::from_millis(400));

        for attempt in 1..=20 {
            for _ in 0..50 {
                let delay = p.calculate_backoff_delay(attempt);
                assert!(delay <= Duration::from_millis(36_000));
            }
        }
    }

    #[test]
    fn test_backoff_never_negative() {
        let p: RetryPolicy<SyncError> =
            RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(100), 1.0);
        assert_eq!(p.backoff_delay(1, -1.0), Duration::ZERO);
    }

    #[test]
    fn test_jitter_factor_is_clamped() {
        let p: RetryPolicy<SyncError> =
            RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(100), 4.0);
        assert_eq!(p.jitter_factor, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_k_failures() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(5));

        let result = executor
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n <= 3 {
                        Err(SyncError::ConnectionFailed(format!("attempt {}", n)))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_surfaced_unchanged() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(3));

        let result: Result<(), SyncError> = executor
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(SyncError::ConnectionFailed(format!("attempt {}", n))) }
            })
            .await;

        match result {
            Err(SyncError::ConnectionFailed(msg)) => assert_eq!(msg, "attempt 3"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_false_fails_after_one_attempt() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(10).with_should_retry(|_, _| false));

        let result: Result<(), SyncError> = executor
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Timeout(5)) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Timeout(5))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cloud_policy_fails_fast_on_auth_error() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(RetryPolicy::for_cloud(&RetrySettings::default()));

        let result: Result<(), SyncError> = executor
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Unauthorized("revoked".into())) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_sees_each_backoff() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let executor = RetryExecutor::new(policy(3).with_on_retry(move |_, attempt, delay| {
            sink.lock().unwrap().push((attempt, delay));
        }));

        let start = tokio::time::Instant::now();
        let _: Result<(), SyncError> = executor
            .run(|| async { Err(SyncError::Disconnected) })
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200)),
            ]
        );
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_attempts_runs_once() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(0));

        let _: Result<(), SyncError> = executor
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Disconnected) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
