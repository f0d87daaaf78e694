use std::time::Duration;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Upper bound on one attempt.
    pub attempt_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based): `initial * 2^retry`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            retries: 0,
        }
    }
}

/// Next move after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    RetryAfter(Duration),
    Exhausted,
}

/// Retry bookkeeping for one unit of work.
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    policy: BackoffPolicy,
    retries: u32,
}

impl RetryState {
    /// Record a failure and decide what happens next.
    pub fn on_failure(&mut self) -> RetryStep {
        if self.retries >= self.policy.max_retries {
            return RetryStep::Exhausted;
        }
        let delay = self.policy.delay_for(self.retries);
        self.retries += 1;
        RetryStep::RetryAfter(delay)
    }

    /// Total attempts made so far, counting the first.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.policy.attempt_timeout
    }
}
