//! Retries for Firestore calls.
//!
//! Store calls back off on their own schedule, separate from the dispatcher's
//! provider retry loop. Writes that are not idempotent only replay failures
//! the server rejected before applying anything.

use std::str::FromStr;
use std::time::Duration;

use tracing::{info_span, warn, Instrument};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_retry;

/// Which failures a call may replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Network errors, 429 and 5xx. For reads and idempotent writes.
    Transient,
    /// 429 only. A 5xx or a dropped connection may hide an applied write.
    Throttled,
}

impl Replay {
    fn allows(self, error: &StoreError) -> bool {
        match self {
            Replay::Transient => error.is_retryable(),
            Replay::Throttled => matches!(error, StoreError::RateLimited(_)),
        }
    }
}

/// Store backoff: `min(initial * 2^attempt, max)`, or the server's
/// Retry-After capped at `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// `FIRESTORE_MAX_RETRIES`, `FIRESTORE_RETRY_BASE_MS`, `FIRESTORE_RETRY_MAX_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_parse("FIRESTORE_MAX_RETRIES").unwrap_or(defaults.max_retries),
            initial: env_parse("FIRESTORE_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial),
            max: env_parse("FIRESTORE_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max),
        }
    }

    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(after) = retry_after {
            return after.min(self.max);
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Run `op`, replaying the failures `replay` allows up to `max_retries` times.
    pub async fn run<T, F, Fut>(&self, operation: &str, replay: Replay, op: F) -> StoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let span = info_span!("store_call", operation = %operation, attempt = attempt + 1);
            match op().instrument(span).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && replay.allows(&e) => {
                    let delay = self.delay(attempt, e.retry_after_ms().map(Duration::from_millis));
                    warn!(
                        operation = %operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store call failed, retrying"
                    );
                    record_retry(operation);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
