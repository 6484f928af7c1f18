//! Exponential backoff with jitter.
//!
//! Shared by the resolver (between API retries) and the job processor
//! (before a requeued job is dispatched again).

use std::time::Duration;

use rand::Rng;

/// Exponential backoff policy: `base * 2^(attempt-1)`, capped at `max`,
/// plus up to 20% random jitter (never exceeding `max`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self.base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_ms))
    }

    /// Delay before retry number `attempt` (1-based), with jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as u64;
        let spread = base / 5;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        Duration::from_millis((base + jitter).min(self.max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles() {
        let backoff = Backoff::new(100, 10_000);
        assert_eq!(backoff.base_delay(1), Duration::from_millis(100));
        assert_eq!(backoff.base_delay(2), Duration::from_millis(200));
        assert_eq!(backoff.base_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_base_delay_is_capped() {
        let backoff = Backoff::new(1_000, 5_000);
        assert_eq!(backoff.base_delay(10), Duration::from_millis(5_000));
        assert_eq!(backoff.base_delay(u32::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let backoff = Backoff::new(100, 10_000);
        for _ in 0..50 {
            let d = backoff.delay(2).as_millis();
            assert!((200..=240).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn test_jitter_never_exceeds_max() {
        let backoff = Backoff::new(1_000, 1_000);
        for _ in 0..20 {
            assert_eq!(backoff.delay(5), Duration::from_millis(1_000));
        }
    }

    #[test]
    fn test_zero_base_means_no_delay() {
        let backoff = Backoff::new(0, 0);
        assert_eq!(backoff.delay(3), Duration::ZERO);
    }
}
