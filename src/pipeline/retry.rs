//! Bound on the verification feedback loop.

use std::time::Duration;

/// Backoff never grows past this multiple of the base delay
const MAX_BACKOFF_FACTOR: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Corrective resends allowed per submission
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// No delay between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    /// Whether attempt number `attempt` (1-based) may still run
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Delay before retry `attempt` (1-based): base, 2x, 4x, then 8x onwards
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(3);
        let factor = 2u32.pow(exponent).min(MAX_BACKOFF_FACTOR);
        self.backoff.saturating_mul(factor)
    }
}
