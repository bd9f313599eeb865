//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

/// Backoff policy for failed events.
///
/// The exponent is the event row's persisted `attempts` counter. The row is
/// the single source of truth; there is no separately tracked count to drift
/// from it across retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay; the first retry waits base * multiplier.
    pub base_delay: Duration,

    /// Backoff multiplier.
    pub multiplier: f64,

    /// Upper bound for the random jitter added to each delay, spreading out
    /// retries that would otherwise share a window. Zero disables it.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Same schedule, no jitter. Deterministic, so tests can assert exact
    /// retry windows.
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Delay before the next retry: base_delay * multiplier^attempts
    /// (+ jitter).
    ///
    /// Example with base_delay=2s, multiplier=2.0, jitter off:
    /// - after attempt 1: 4s
    /// - after attempt 2: 8s
    /// - after attempt 3: 16s
    pub fn delay(&self, attempts: u32) -> Duration {
        // Cap the exponent; past ~2^32 the f64 would go non-finite.
        let exp = attempts.min(32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let jitter_secs = if self.max_jitter.is_zero() {
            0.0
        } else {
            rand::thread_rng().gen_range(0.0..self.max_jitter.as_secs_f64())
        };
        Duration::from_secs_f64(delay_secs + jitter_secs)
    }
}
