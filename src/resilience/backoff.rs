//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

use crate::config::ReconnectConfig;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Per-worker reconnect schedule.
///
/// Each failed attempt grows the delay; a successful connect resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            base_ms: config.base_delay_ms,
            max_ms: config.max_delay_ms,
            attempt: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        calculate_backoff(self.attempt, self.base_ms, self.max_ms)
    }

    /// Consecutive failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000);
        assert!(max.as_millis() < 1100);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let delay = calculate_backoff(u32::MAX, 100, 5000);
        assert!(delay.as_millis() >= 5000);
    }

    #[test]
    fn test_schedule_grows_and_resets() {
        let mut backoff = Backoff::new(&ReconnectConfig {
            base_delay_ms: 10,
            max_delay_ms: 1000,
        });

        let first = backoff.next_delay();
        let second = backoff.next_delay();
        let third = backoff.next_delay();
        assert!(first.as_millis() >= 10 && first.as_millis() < 20);
        assert!(second.as_millis() >= 20);
        assert!(third.as_millis() >= 40);
        assert_eq!(backoff.attempts(), 3);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay().as_millis() < 20);
    }
}
