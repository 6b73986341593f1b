//! API rate-limit bookkeeping for remote hosts.
//!
//! Every response from a forge carries `X-RateLimit-Remaining` and
//! `X-RateLimit-Reset` (or their unprefixed `RateLimit-*` spelling). The host
//! records them here and pauses before a request once the remaining quota
//! drops under a configured buffer. A rejected request is turned into a
//! retry hint for the store's retry policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tracing::{debug, info};

/// remaining quota before the first response is seen
const UNKNOWN: u64 = u64::MAX;

/// Quota state shared by all clones of a host.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    remaining: Arc<AtomicU64>,
    /// unix seconds
    reset_at: Arc<AtomicU64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(UNKNOWN)),
            reset_at: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    pub fn reset_at(&self) -> u64 {
        self.reset_at.load(Ordering::Relaxed)
    }

    /// Record the quota headers of a response, if present.
    pub fn record(&self, headers: &HeaderMap) {
        if let Some(remaining) = header_u64(headers, "x-ratelimit-remaining", "ratelimit-remaining") {
            self.remaining.store(remaining, Ordering::Relaxed);
        }
        if let Some(reset) = header_u64(headers, "x-ratelimit-reset", "ratelimit-reset") {
            self.reset_at.store(reset, Ordering::Relaxed);
        }
    }

    /// Seconds until the quota window resets, 0 when it already has.
    pub fn seconds_until_reset(&self) -> u64 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.reset_at().saturating_sub(now)
    }

    /// Sleep until the window resets when fewer than `buffer` calls remain.
    ///
    /// Returns `true` if the caller had to wait.
    pub async fn throttle(&self, buffer: u32) -> bool {
        let remaining = self.remaining();
        if remaining == UNKNOWN || remaining >= u64::from(buffer) {
            return false;
        }

        let wait = self.seconds_until_reset();
        if wait == 0 {
            debug!(remaining, buffer, "rate limit window already reset");
            return false;
        }

        info!(remaining, reset_in_secs = wait, buffer, "self-throttling: rate limit approaching");
        tokio::time::sleep(Duration::from_secs(wait)).await;
        true
    }

    /// How long a rejected request should back off.
    ///
    /// An explicit `Retry-After` wins; otherwise an exhausted quota waits for
    /// its reset. `None` leaves the delay to the caller's backoff.
    pub fn retry_hint(&self, headers: &HeaderMap) -> Option<Duration> {
        if let Some(secs) = header_u64(headers, "retry-after", "retry-after") {
            return Some(Duration::from_secs(secs));
        }
        match self.seconds_until_reset() {
            0 => None,
            secs if self.remaining() == 0 => Some(Duration::from_secs(secs)),
            _ => None,
        }
    }
}

/// Whether a 403/429 response is a rate-limit rejection rather than a
/// permission problem.
pub fn is_rate_limited(status: u16, headers: &HeaderMap) -> bool {
    match status {
        429 => true,
        403 => {
            headers.contains_key("retry-after")
                || header_u64(headers, "x-ratelimit-remaining", "ratelimit-remaining") == Some(0)
        }
        _ => false,
    }
}

fn header_u64(headers: &HeaderMap, name: &str, fallback: &str) -> Option<u64> {
    headers
        .get(name)
        .or_else(|| headers.get(fallback))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
