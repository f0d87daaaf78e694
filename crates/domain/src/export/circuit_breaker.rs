use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    /// One probe delivery is let through.
    HalfOpen,
    Open,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half_open",
            Self::Open => "open",
        }
    }
}

/// Per-sink circuit breaker.
///
/// Closed → Open after `failure_threshold` consecutive failures;
/// Open → `HalfOpen` once `open_duration` has passed; `HalfOpen` → Closed
/// on success, back to Open on failure. While half-open only one probe
/// is admitted until its outcome is recorded.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failures: usize,
    failure_threshold: usize,
    open_duration: Duration,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, open_duration: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            failure_threshold: failure_threshold.max(1),
            open_duration,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    pub fn can_attempt(&mut self) -> bool {
        self.can_attempt_at(Instant::now())
    }

    pub fn can_attempt_at(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .is_some_and(|t| now.saturating_duration_since(t) >= self.open_duration);
                if elapsed {
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                }
                elapsed
            }
        }
    }

    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.failures += 1;
        self.probe_in_flight = false;
        if self.state == CircuitState::HalfOpen || self.failures >= self.failure_threshold {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }
}
