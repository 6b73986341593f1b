//! Retry with exponential backoff and jitter.
//!
//! The operation handed to [`RetryPolicy::run`] is re-executed from scratch
//! on every attempt, so it must not carry state between attempts. Only errors
//! that report themselves as retriable (a rejected branch update or host rate
//! limiting) are retried; anything else returns on the spot.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::host::HostError;
use crate::store::error::StoreError;

/// Errors that can tell a retry loop whether another attempt may succeed.
pub trait Retryable {
    fn is_retriable(&self) -> bool;

    /// the remote side refused the request without applying it
    fn is_rate_limited(&self) -> bool {
        false
    }

    /// delay requested by the remote side, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for HostError {
    fn is_retriable(&self) -> bool {
        HostError::is_retriable(self)
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, HostError::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            HostError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl Retryable for StoreError {
    fn is_retriable(&self) -> bool {
        match self {
            StoreError::Host(e) => e.is_retriable(),
            _ => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        match self {
            StoreError::Host(e) => Retryable::is_rate_limited(e),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            StoreError::Host(e) => Retryable::retry_after(e),
            _ => None,
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// total attempts, including the first
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff before retry number `attempt + 1` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// backoff plus uniform jitter of up to 100% of it
    fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let jitter_ms = match backoff.as_millis() as u64 {
            0 => 0,
            ms => rand::thread_rng().gen_range(0..=ms),
        };
        backoff + Duration::from_millis(jitter_ms)
    }

    /// Run `operation` until it succeeds, fails with a non-retriable error or
    /// the attempts run out. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, label: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.run_if(label, E::is_retriable, operation).await
    }

    /// Like [`run`](Self::run) but only retries rate-limit rejections. For
    /// requests that are not safe to repeat after any other failure.
    pub async fn run_rate_limited<T, E, F, Fut>(&self, label: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.run_if(label, E::is_rate_limited, operation).await
    }

    async fn run_if<T, E, F, Fut>(
        &self,
        label: &str,
        should_retry: fn(&E) -> bool,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation = label, retries = attempt, "succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    attempt += 1;
                    let retriable = should_retry(&e);
                    if !retriable || attempt >= max_attempts {
                        if retriable {
                            warn!(operation = label, attempts = attempt, error = %e, "retries exhausted");
                        }
                        return Err(e);
                    }

                    let delay = e.retry_after().unwrap_or_else(|| self.delay_for(attempt - 1));
                    warn!(
                        operation = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retriable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    fn cas_rejected() -> HostError {
        HostError::NotFastForward {
            branch: "main".to_string(),
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(1600));
    }

    #[test]
    fn jitter_stays_within_one_backoff() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= policy.backoff(attempt));
            assert!(delay <= policy.backoff(attempt) * 2);
        }
    }

    #[tokio::test]
    async fn retries_cas_rejection_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast(5)
            .run("test", || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(cas_rejected()),
                    _ => Ok("done"),
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), HostError> = fast(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HostError::NotFound("x".to_string()))
            })
            .await;

        assert!(matches!(result, Err(HostError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = fast(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::from(cas_rejected()))
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_shares_the_budget_and_honors_hint() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::new(3, Duration::from_secs(60))
            .run("test", || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(HostError::RateLimited {
                        retry_after: Some(Duration::from_millis(1)),
                    }),
                    _ => Ok(7),
                }
            })
            .await;

        // the hint replaces the 60s backoff
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rate_limited_run_leaves_conflicts_alone() {
        let calls = AtomicU32::new(0);
        let result: Result<(), HostError> = fast(5)
            .run_rate_limited("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(cas_rejected())
            })
            .await;

        assert!(matches!(result, Err(HostError::NotFastForward { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limited_run_retries_rate_limits() {
        let calls = AtomicU32::new(0);
        let result = fast(5)
            .run_rate_limited("test", || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(StoreError::from(HostError::RateLimited { retry_after: None })),
                    _ => Ok(()),
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn deserializes_from_config_keys() {
        let policy: RetryPolicy = toml::from_str("max_attempts = 3\nbase_delay_ms = 50").unwrap();
        assert_eq!(policy, RetryPolicy::new(3, Duration::from_millis(50)));

        let defaulted: RetryPolicy = toml::from_str("").unwrap();
        assert_eq!(defaulted, RetryPolicy::default());
    }
}
