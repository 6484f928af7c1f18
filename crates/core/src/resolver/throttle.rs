//! Per-owner request throttling.
//!
//! Token bucket per owner: each bucket holds up to `requests_per_second`
//! tokens and refills continuously. Callers wait for a token instead of
//! failing, so a burst from one owner slows that owner down without
//! surfacing errors.
//!
//! A full bucket behaves exactly like a new one, so full buckets are dropped
//! once the map grows past a threshold.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    /// Max tokens (= requests per second).
    capacity: f64,
    tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// The bucket starts full, allowing an immediate burst up to capacity.
    fn new(requests_per_second: u32) -> Self {
        let capacity = requests_per_second.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_rate: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Take a token, or return how long until one is available.
    fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let tokens_needed = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(tokens_needed / self.refill_rate))
        }
    }

    fn is_full(&mut self) -> bool {
        self.refill();
        self.tokens >= self.capacity
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Bucket count above which idle buckets are pruned.
const PRUNE_ABOVE: usize = 1024;

/// Token buckets keyed by owner ID.
#[derive(Debug)]
pub struct OwnerThrottle {
    requests_per_second: u32,
    buckets: Mutex<HashMap<i64, TokenBucket>>,
    prune_above: usize,
}

impl OwnerThrottle {
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            requests_per_second,
            buckets: Mutex::new(HashMap::new()),
            prune_above: PRUNE_ABOVE,
        }
    }

    /// Take a token for `owner_id`, or return the wait until one is free.
    pub async fn try_acquire(&self, owner_id: i64) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().await;
        if buckets.len() >= self.prune_above && !buckets.contains_key(&owner_id) {
            let before = buckets.len();
            buckets.retain(|_, bucket| !bucket.is_full());
            debug!(pruned = before - buckets.len(), "Pruned idle owner buckets");
        }
        buckets
            .entry(owner_id)
            .or_insert_with(|| TokenBucket::new(self.requests_per_second))
            .try_acquire()
    }

    /// Wait until a token for `owner_id` is available and take it.
    pub async fn acquire(&self, owner_id: i64) {
        loop {
            match self.try_acquire(owner_id).await {
                Ok(()) => return,
                Err(wait) => {
                    debug!(owner_id, wait_ms = wait.as_millis() as u64, "Owner throttled");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_allows_burst_up_to_capacity() {
        let mut bucket = TokenBucket::new(5);
        for _ in 0..5 {
            assert!(bucket.try_acquire().is_ok());
        }
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(200));
    }

    #[test]
    fn test_zero_rate_treated_as_one() {
        let mut bucket = TokenBucket::new(0);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }

    #[tokio::test]
    async fn test_owners_are_independent() {
        let throttle = OwnerThrottle::new(1);
        assert!(throttle.try_acquire(1).await.is_ok());
        assert!(throttle.try_acquire(1).await.is_err());
        assert!(throttle.try_acquire(2).await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let throttle = OwnerThrottle::new(20);
        let start = Instant::now();
        for _ in 0..21 {
            throttle.acquire(9).await;
        }
        // The 21st token needs ~50ms of refill.
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_idle_buckets_are_pruned() {
        let mut throttle = OwnerThrottle::new(1000);
        throttle.prune_above = 4;
        for owner in 0..4 {
            throttle.acquire(owner).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        throttle.acquire(99).await;
        let buckets = throttle.buckets.lock().await;
        assert_eq!(buckets.len(), 1);
        assert!(buckets.contains_key(&99));
    }

    #[tokio::test]
    async fn test_busy_buckets_are_kept() {
        let mut throttle = OwnerThrottle::new(1);
        throttle.prune_above = 4;
        for owner in 0..4 {
            throttle.acquire(owner).await;
        }

        throttle.acquire(99).await;
        assert_eq!(throttle.buckets.lock().await.len(), 5);
        // A throttled owner still waits after pruning.
        assert!(throttle.try_acquire(0).await.is_err());
    }
}
