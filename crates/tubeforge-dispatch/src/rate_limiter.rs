//! Sliding-window admission control for provider calls.
//!
//! Every caller reserves its admission instant inside one critical section:
//! expired reservations are pruned, the slot is computed (`now` when the
//! window has room, otherwise the R-th most recent reservation plus the
//! window length) and recorded before the lock is released. The caller then
//! sleeps until its slot with no lock held. A sleeping caller already owns
//! its place in the window, so it cannot be counted twice and other callers
//! cannot overtake it into the same window.
//!
//! Invariant: any half-open interval `(t - window, t]` contains at most
//! `capacity` reservations.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::metrics::record_rate_limit_wait;

/// Default rolling window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    /// Reservation instants, ascending. May contain future slots.
    reservations: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter admitting `capacity` calls per `window`.
    pub fn new(capacity: u32, window: Duration) -> DispatchResult<Self> {
        if capacity == 0 {
            return Err(DispatchError::config_error(
                "rate limiter capacity must be at least 1",
            ));
        }
        if window.is_zero() {
            return Err(DispatchError::config_error("rate limiter window cannot be zero"));
        }
        Ok(Self {
            capacity: capacity as usize,
            window,
            reservations: Mutex::new(VecDeque::with_capacity(capacity as usize + 1)),
        })
    }

    /// Limiter admitting `capacity` calls per rolling minute.
    pub fn per_minute(capacity: u32) -> DispatchResult<Self> {
        Self::new(capacity, DEFAULT_WINDOW)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until one call is admitted; the admission is recorded.
    ///
    /// Returns how long the caller waited. When `cancel` fires first the
    /// reservation is released and `DispatchError::Cancelled` is returned.
    pub async fn acquire(&self, cancel: &CancellationToken) -> DispatchResult<Duration> {
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let (now, slot) = self.reserve().await;
        let wait = slot.saturating_duration_since(now);

        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting for slot");
            tokio::select! {
                _ = tokio::time::sleep_until(slot) => {}
                _ = cancel.cancelled() => {
                    self.release(slot).await;
                    return Err(DispatchError::Cancelled);
                }
            }
        }

        record_rate_limit_wait(wait.as_secs_f64());
        Ok(wait)
    }

    /// Reservations whose slot lies in `(now - window, now]`.
    pub async fn admitted_in_window(&self) -> usize {
        let now = Instant::now();
        let reservations = self.reservations.lock().await;
        reservations
            .iter()
            .filter(|&&at| at <= now && at + self.window > now)
            .count()
    }

    async fn reserve(&self) -> (Instant, Instant) {
        let mut reservations = self.reservations.lock().await;
        let now = Instant::now();

        while let Some(&oldest) = reservations.front() {
            if oldest + self.window <= now {
                reservations.pop_front();
            } else {
                break;
            }
        }

        let slot = if reservations.len() < self.capacity {
            now
        } else {
            let anchor = reservations[reservations.len() - self.capacity];
            (anchor + self.window).max(now)
        };

        reservations.push_back(slot);
        (now, slot)
    }

    async fn release(&self, slot: Instant) {
        let mut reservations = self.reservations.lock().await;
        if let Some(pos) = reservations.iter().rposition(|&at| at == slot) {
            reservations.remove(pos);
        }
    }
}
