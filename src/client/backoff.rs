//! Reconnect backoff

use std::time::Duration;

/// Exponential reconnect delay: `min(initial * 2^attempts, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before the reconnect that follows `attempts` failed cycles
    pub fn delay(&self, attempts: u32) -> Duration {
        let initial = self.initial.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        let delay = initial.saturating_mul(2u64.saturating_pow(attempts));
        Duration::from_millis(delay.min(max))
    }
}
