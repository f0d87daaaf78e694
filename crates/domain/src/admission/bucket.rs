use std::time::{Duration, Instant};

/// Upper bound on advertised retry delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Result of asking a bucket for `n` tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BucketOutcome {
    /// Enough tokens; they were debited.
    Admitted,
    /// Not enough tokens and the caller blocks on overage. Nothing debited.
    Exceeded { retry_after: Duration },
    /// Not enough tokens but the caller admits anyway; the bucket drained
    /// to zero.
    Overage,
}

/// Token bucket refilled continuously at `capacity` tokens per second.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A new bucket starts full.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(max_eps: u64, now: Instant) -> Self {
        let capacity = max_eps as f64;
        Self {
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn has_capacity(&self, max_eps: u64) -> bool {
        (self.capacity - max_eps as f64).abs() < f64::EPSILON
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// `tokens = min(capacity, tokens + elapsed * capacity)`.
    /// A clock that went backwards adds nothing.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.capacity).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Refill, then try to debit `n` tokens.
    #[allow(clippy::cast_precision_loss)]
    pub fn take(&mut self, n: u64, block_on_exceed: bool, now: Instant) -> BucketOutcome {
        self.refill(now);
        let wanted = n as f64;
        if self.tokens >= wanted {
            self.tokens -= wanted;
            return BucketOutcome::Admitted;
        }
        if block_on_exceed {
            return BucketOutcome::Exceeded {
                retry_after: self.wait_for(wanted),
            };
        }
        self.tokens = 0.0;
        BucketOutcome::Overage
    }

    /// Same answer as [`take`](Self::take) without touching the bucket.
    pub fn peek(&self, n: u64, block_on_exceed: bool, now: Instant) -> BucketOutcome {
        self.clone().take(n, block_on_exceed, now)
    }

    /// Time until `wanted` tokens would be available, rounded up to whole
    /// seconds, at least one and at most [`MAX_RETRY_AFTER`].
    fn wait_for(&self, wanted: f64) -> Duration {
        if self.capacity <= 0.0 {
            return Duration::from_secs(1);
        }
        let secs = ((wanted - self.tokens) / self.capacity).ceil().max(1.0);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_AFTER)
            .min(MAX_RETRY_AFTER)
    }
}
