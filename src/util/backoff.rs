use std::time::Duration;

use rand::Rng;

/// Reusable exponential backoff policy, parameterized per call site
/// instead of duplicated inline.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at
    /// `max_delay`, with up to 10% jitter to avoid thundering herds.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.0..=0.1);
        exp.mul_f64(1.0 + jitter)
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts
    }
}

/// Pacer for long scans against a rate-limited remote: a fixed delay
/// between fetches, doubling on throttling up to a hard cap, reset
/// back to the base after the next success.
#[derive(Debug)]
pub struct AdaptivePacer {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl AdaptivePacer {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base,
        }
    }

    /// Delay to apply after a throttling response or timeout.
    pub fn on_throttle(&mut self, retry_after: Option<Duration>) -> Duration {
        let delay = retry_after.unwrap_or(self.current).min(self.cap);
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    pub fn on_success(&mut self) {
        self.current = self.base;
    }

    /// Inter-fetch pacing delay.
    pub fn step(&self) -> Duration {
        self.base
    }
}
