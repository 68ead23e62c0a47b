//! Per-provider request limiting.
//!
//! A [`RateLimiter`] combines two independent limits that must both be
//! satisfied before a request may go out:
//!
//! - a token bucket refilled continuously at `requests_per_second`, which
//!   bounds the long-run request rate while allowing short bursts, and
//! - a concurrency ceiling (`max_concurrent`), which bounds how many
//!   requests are in flight at once.
//!
//! One limiter exists per provider and is shared by every task targeting
//! that provider, since provider limits apply to the account rather than
//! to a single task. Waiters are served in FIFO order: the slot semaphore
//! and the bucket mutex are both fair.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Duration, Instant};

use crate::error::ProviderError;
use crate::provider::ProviderId;

/// Longest single sleep while waiting for a token. Slower rates wait in
/// several steps.
const MAX_TOKEN_WAIT: Duration = Duration::from_secs(3600);

/// Token bucket refilled continuously.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_second: f64, capacity: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.per_second).min(self.capacity);
        self.last_refill = now;
    }

    /// Take a token, or report how long until one is available.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let secs = (1.0 - self.tokens) / self.per_second;
            Err(Duration::try_from_secs_f64(secs)
                .unwrap_or(MAX_TOKEN_WAIT)
                .min(MAX_TOKEN_WAIT))
        }
    }
}

/// Rate and concurrency limiter for one provider.
#[derive(Debug)]
pub struct RateLimiter {
    provider: ProviderId,
    bucket: Option<Mutex<TokenBucket>>,
    slots: Arc<Semaphore>,
    max_concurrent: Option<usize>,
    in_flight: Arc<AtomicUsize>,
}

impl RateLimiter {
    /// Create a limiter. `None` disables the corresponding limit.
    ///
    /// `burst` is the bucket capacity; it defaults to
    /// `max(1, requests_per_second)`. The bucket starts full.
    pub fn new(
        provider: ProviderId,
        requests_per_second: Option<f64>,
        burst: Option<f64>,
        max_concurrent: Option<usize>,
    ) -> Self {
        let bucket = requests_per_second
            .filter(|r| r.is_finite() && *r > 0.0)
            .map(|rate| {
                let capacity = burst
                    .filter(|b| b.is_finite() && *b >= 1.0)
                    .unwrap_or_else(|| rate.max(1.0));
                Mutex::new(TokenBucket::new(rate, capacity))
            });
        let max_concurrent = max_concurrent.map(|c| c.max(1));
        let permits = max_concurrent.unwrap_or(Semaphore::MAX_PERMITS);

        Self {
            provider,
            bucket,
            slots: Arc::new(Semaphore::new(permits)),
            max_concurrent,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A limiter that never waits (local providers).
    pub fn unlimited(provider: ProviderId) -> Self {
        Self::new(provider, None, None, None)
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    /// Wait for both a concurrency slot and a rate token.
    ///
    /// The returned permit holds the slot until it is dropped, so the slot
    /// is released on every exit path of the caller.
    pub async fn acquire(&self) -> Result<RatePermit, ProviderError> {
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProviderError::Config(format!("{} rate limiter closed", self.provider)))?;

        if let Some(bucket) = &self.bucket {
            // The lock is held while sleeping so later waiters queue behind us.
            let mut bucket = bucket.lock().await;
            while let Err(wait) = bucket.try_take(Instant::now()) {
                tokio::time::sleep(wait).await;
            }
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(RatePermit {
            _slot: slot,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Configured concurrency ceiling, `None` when unbounded.
    pub fn max_concurrent(&self) -> Option<usize> {
        self.max_concurrent
    }

    /// Concurrency slots not currently held.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

/// A granted request slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct RatePermit {
    _slot: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl RatePermit {
    /// Release the slot explicitly (same as dropping the permit).
    pub fn release(self) {}
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "tests/rate_limit_tests.rs"]
mod tests;
