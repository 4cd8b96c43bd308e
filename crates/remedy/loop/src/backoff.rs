//! Inter-cycle backoff policy.

use std::time::Duration;

/// Exponential backoff capped at a maximum interval.
///
/// `delay(k) = min(base * 2^k, max)` where `k` is the number of consecutive
/// failed cycles. Zero failures gives exactly the base interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before the next cycle after `consecutive_failures` failed cycles.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let factor = 1u32.checked_shl(consecutive_failures);
        match factor.and_then(|f| self.base.checked_mul(f)) {
            Some(delay) => delay.min(self.max),
            None => self.max,
        }
    }
}
