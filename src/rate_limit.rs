//! Request rate limiting using a token bucket
//!
//! The indexer aggregator is a shared upstream; every outbound request
//! acquires a permit from a [`RequestLimiter`] before it is issued. The
//! bucket refills continuously at the configured rate and allows short
//! bursts up to its capacity.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tokens are tracked in thousandths of a request so fractional refill
/// rates stay exact under integer atomics.
const TOKEN_SCALE: u64 = 1000;

/// Token-bucket limiter shared across all requests to one upstream
///
/// Lock-free: tokens and the last refill timestamp are atomics, refilled
/// lazily by whichever caller arrives next.
#[derive(Clone)]
pub struct RequestLimiter {
    /// Refill rate in requests per second, scaled by [`TOKEN_SCALE`]
    rate: Arc<AtomicU64>,
    /// Available tokens, scaled by [`TOKEN_SCALE`]
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since `origin`)
    last_refill: Arc<AtomicU64>,
    /// Process-local time origin for the nanosecond clock
    origin: Instant,
    /// Bucket capacity, scaled by [`TOKEN_SCALE`]
    capacity: u64,
}

impl RequestLimiter {
    /// Create a limiter allowing `rate_per_sec` requests per second with a
    /// burst capacity of `burst` requests.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let capacity = u64::from(burst.max(1)) * TOKEN_SCALE;
        Self {
            rate: Arc::new(AtomicU64::new((rate_per_sec * TOKEN_SCALE as f64) as u64)),
            tokens: Arc::new(AtomicU64::new(capacity)),
            last_refill: Arc::new(AtomicU64::new(0)),
            origin: Instant::now(),
            capacity,
        }
    }

    /// Acquire one request permit, waiting until the bucket can supply it.
    pub async fn acquire(&self) {
        loop {
            self.refill();

            let available = self.tokens.load(Ordering::Acquire);
            if available >= TOKEN_SCALE
                && self
                    .tokens
                    .compare_exchange(
                        available,
                        available - TOKEN_SCALE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                return;
            }

            // Not enough tokens; wait roughly one token's worth of refill
            let rate = self.rate.load(Ordering::Relaxed).max(1);
            let wait_ms = (TOKEN_SCALE * 1000 / rate).clamp(10, 2000);
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    }

    /// Refill tokens for the time elapsed since the previous refill.
    fn refill(&self) {
        let now_nanos = self.origin.elapsed().as_nanos() as u64;
        let last = self.last_refill.swap(now_nanos, Ordering::AcqRel);
        let elapsed_nanos = now_nanos.saturating_sub(last);
        if elapsed_nanos == 0 {
            return;
        }

        let rate = self.rate.load(Ordering::Relaxed);
        let new_tokens = (elapsed_nanos as u128 * rate as u128 / 1_000_000_000) as u64;
        if new_tokens == 0 {
            // Give the elapsed time back so short intervals still accumulate
            self.last_refill.store(last, Ordering::Release);
            return;
        }

        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            let next = (current + new_tokens).min(self.capacity);
            match self.tokens.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for RequestLimiter {
    /// One request per second with a burst of five, a polite default for a
    /// shared indexer aggregator.
    fn default() -> Self {
        Self::new(1.0, 5)
    }
}
