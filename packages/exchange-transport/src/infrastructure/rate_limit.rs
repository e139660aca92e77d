//! Token bucket rate limiter.
//!
//! Admission has two parts:
//!
//! - a concurrency semaphore sized to the burst capacity; each permit holds
//!   one slot until it is released
//! - a token bucket refilled at the sustained rate, charged the endpoint
//!   weight, which paces admissions

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::application::ports::{Permit, RateLimiter};
use crate::domain::error::{TransportError, TransportResult};
use crate::domain::request::RateLimitContext;

/// Longest single sleep while waiting for tokens.
const MAX_REFILL_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            tokens: f64::from(capacity),
            capacity: f64::from(capacity),
            refill_rate: refill_rate.max(0.0),
            last_update: Instant::now(),
        }
    }

    /// Take `amount` tokens, or report how long until they are available.
    fn try_consume(&mut self, amount: u32) -> Option<Duration> {
        self.refill();

        let amount = f64::from(amount);
        if self.tokens >= amount {
            self.tokens -= amount;
            return None;
        }

        let deficit = amount - self.tokens;
        let wait = Duration::try_from_secs_f64(deficit / self.refill_rate)
            .unwrap_or(MAX_REFILL_WAIT);
        Some(wait.clamp(Duration::from_millis(1), MAX_REFILL_WAIT))
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update);
        self.tokens = elapsed
            .as_secs_f64()
            .mul_add(self.refill_rate, self.tokens)
            .min(self.capacity);
        self.last_update = now;
    }
}

/// Snapshot of limiter activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Permits currently held.
    pub in_flight: usize,
    /// Permits ever issued.
    pub acquired: u64,
    /// Permits returned.
    pub released: u64,
}

/// [`RateLimiter`] combining a concurrency cap with a token bucket.
#[derive(Debug)]
pub struct TokenBucketRateLimiter {
    context: RateLimitContext,
    slots: Arc<Semaphore>,
    capacity: u32,
    bucket: Mutex<TokenBucket>,
    next_id: AtomicU64,
    released: AtomicU64,
}

impl TokenBucketRateLimiter {
    /// Create a limiter from `context`.
    #[must_use]
    pub fn new(context: RateLimitContext) -> Self {
        let capacity = context.burst_capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            bucket: Mutex::new(TokenBucket::new(capacity, context.requests_per_second)),
            next_id: AtomicU64::new(0),
            released: AtomicU64::new(0),
            context,
        }
    }

    /// Current activity counters.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            in_flight: (self.capacity as usize).saturating_sub(self.slots.available_permits()),
            acquired: self.next_id.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }

    async fn admit(&self, weight: u32) -> TransportResult<Permit> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| TransportError::Shutdown)?;

        loop {
            let pending = self.bucket.lock().try_consume(weight);
            let Some(wait) = pending else { break };
            tracing::trace!(weight, wait_ms = wait.as_millis(), "Waiting for rate limit tokens");
            tokio::time::sleep(wait).await;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Permit::new(id, weight).with_slot(slot))
    }
}

#[async_trait]
impl RateLimiter for TokenBucketRateLimiter {
    async fn acquire(&self, weight: u32) -> TransportResult<Permit> {
        let weight = weight.clamp(1, self.capacity);
        let timeout = self.context.acquire_timeout;
        tokio::time::timeout(timeout, self.admit(weight))
            .await
            .map_err(|_| TransportError::timeout("rate limit acquire", timeout))?
    }

    fn release(&self, permit: Permit) {
        self.released.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            permit_id = permit.id(),
            held_ms = permit.held_for().as_millis(),
            "Rate limit permit released"
        );
        drop(permit);
    }

    fn weight_for(&self, endpoint: &str) -> u32 {
        self.context
            .endpoint_weights
            .get(endpoint)
            .copied()
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn limiter(rps: f64, burst: u32) -> TokenBucketRateLimiter {
        TokenBucketRateLimiter::new(RateLimitContext {
            requests_per_second: rps,
            burst_capacity: burst,
            endpoint_weights: HashMap::from([("/api/v3/depth".to_string(), 5)]),
            acquire_timeout: Duration::from_millis(200),
        })
    }

    #[test]
    fn bucket_consumes_and_reports_wait() {
        let mut bucket = TokenBucket::new(2, 10.0);
        assert!(bucket.try_consume(1).is_none());
        assert!(bucket.try_consume(1).is_none());
        let wait = bucket.try_consume(1).unwrap();
        assert!(wait <= Duration::from_millis(100));
    }

    #[test]
    fn zero_rate_waits_are_bounded() {
        let mut bucket = TokenBucket::new(1, 0.0);
        assert!(bucket.try_consume(1).is_none());
        assert_eq!(bucket.try_consume(1), Some(MAX_REFILL_WAIT));
    }

    #[test]
    fn endpoint_weights() {
        let limiter = limiter(100.0, 10);
        assert_eq!(limiter.weight_for("/api/v3/depth"), 5);
        assert_eq!(limiter.weight_for("/api/v3/time"), 1);
    }

    #[tokio::test]
    async fn permits_hold_concurrency_slots() {
        let limiter = limiter(1000.0, 2);
        let first = limiter.acquire(1).await.unwrap();
        let second = limiter.acquire(1).await.unwrap();
        assert_eq!(limiter.stats().in_flight, 2);

        let blocked = limiter.acquire(1).await;
        assert!(matches!(blocked, Err(TransportError::Timeout { .. })));

        limiter.release(first);
        assert_eq!(limiter.stats().in_flight, 1);
        let third = limiter.acquire(1).await.unwrap();

        limiter.release(second);
        limiter.release(third);
        let stats = limiter.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.acquired, 3);
        assert_eq!(stats.released, 3);
    }

    #[tokio::test]
    async fn bucket_paces_admissions() {
        let limiter = limiter(20.0, 1);
        let started = Instant::now();
        for _ in 0..3 {
            let permit = limiter.acquire(1).await.unwrap();
            limiter.release(permit);
        }
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn weight_is_clamped_to_capacity() {
        let limiter = limiter(1000.0, 3);
        let permit = limiter.acquire(50).await.unwrap();
        assert_eq!(permit.weight(), 3);
        limiter.release(permit);
    }
}
