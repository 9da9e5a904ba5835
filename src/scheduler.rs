use std::time::Duration;

/// Retry budget and exponential backoff, consulted by the worker between
/// render attempts. Holds no state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryScheduler {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryScheduler {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    pub fn remaining(&self, attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(attempts)
    }

    /// Wait before the k-th retry (k from 0): `base_delay * 2^k`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}
