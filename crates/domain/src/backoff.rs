//! Shared retry backoff schedule: exponential from 1 s, doubling, capped
//! at 30 s, with ±20% jitter.
//!
//! The jitter is deterministic per attempt number — enough to spread
//! retry storms without pulling in a RNG.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryBackoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap applied after exponential growth.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl RetryBackoff {
    /// Delay for the given retry attempt (0-indexed: attempt 0 is the
    /// first retry).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let grown_ms = base_ms * self.factor.powi(attempt as i32);
        let capped_ms = grown_ms.min(self.max_delay.as_millis() as f64);

        // ±20% jitter, deterministic per attempt.
        let jitter = capped_ms * 0.2 * (2.0 * pseudo_random_fraction(attempt) - 1.0);
        Duration::from_millis((capped_ms + jitter).max(0.0) as u64)
    }
}

/// Cheap deterministic "random" fraction [0, 1) based on attempt number.
/// Not cryptographically secure — just enough to spread retry storms.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_add(1).wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_near_one_second() {
        let b = RetryBackoff::default();
        let d = b.delay_for_attempt(0);
        assert!(d >= Duration::from_millis(800), "{d:?}");
        assert!(d <= Duration::from_millis(1200), "{d:?}");
    }

    #[test]
    fn grows_exponentially_within_jitter() {
        let b = RetryBackoff::default();
        // Attempt 2 has a 4 s base; jitter keeps it within ±20%.
        let d = b.delay_for_attempt(2);
        assert!(d >= Duration::from_millis(3200), "{d:?}");
        assert!(d <= Duration::from_millis(4800), "{d:?}");
    }

    #[test]
    fn capped_at_max_plus_jitter() {
        let b = RetryBackoff::default();
        let d = b.delay_for_attempt(20);
        assert!(d <= Duration::from_secs(36), "{d:?}");
        assert!(d >= Duration::from_secs(24), "{d:?}");
    }

    #[test]
    fn deterministic_per_attempt() {
        let b = RetryBackoff::default();
        assert_eq!(b.delay_for_attempt(3), b.delay_for_attempt(3));
    }
}
