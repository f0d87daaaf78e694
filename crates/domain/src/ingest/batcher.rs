use std::time::{Duration, Instant};

use super::entity::CanonicalFlow;

/// Thresholds that close a batch; whichever trips first wins.
#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub max_records: usize,
    /// Approximate serialized size bound.
    pub max_bytes: usize,
    pub flush_interval: Duration,
}

impl BatchPolicy {
    fn count_limit(&self) -> usize {
        self.batch_size.min(self.max_records).max(1)
    }
}

/// Accumulates canonical records into batches.
#[derive(Debug)]
pub struct Batcher {
    policy: BatchPolicy,
    records: Vec<CanonicalFlow>,
    bytes: usize,
    opened_at: Option<Instant>,
}

impl Batcher {
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            policy,
            records: Vec::with_capacity(policy.count_limit()),
            bytes: 0,
            opened_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a record. Returns a closed batch when a threshold trips.
    ///
    /// If the record would push the open batch past `max_bytes`, the
    /// open batch is closed first and the record starts the next one.
    pub fn push(&mut self, record: CanonicalFlow, now: Instant) -> Option<Vec<CanonicalFlow>> {
        let size = serde_json::to_vec(&record).map_or(0, |b| b.len() + 1);

        let mut closed = None;
        if !self.records.is_empty() && self.bytes + size > self.policy.max_bytes {
            closed = self.take();
        }

        if self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
        self.records.push(record);
        self.bytes += size;

        if closed.is_none() && self.records.len() >= self.policy.count_limit() {
            closed = self.take();
        }
        closed
    }

    /// Close the open batch if the flush interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Vec<CanonicalFlow>> {
        let opened = self.opened_at?;
        if now.saturating_duration_since(opened) >= self.policy.flush_interval {
            self.take()
        } else {
            None
        }
    }

    /// When the open batch will be due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|t| t + self.policy.flush_interval)
    }

    /// Close and return whatever is open.
    pub fn take(&mut self) -> Option<Vec<CanonicalFlow>> {
        if self.records.is_empty() {
            return None;
        }
        self.bytes = 0;
        self.opened_at = None;
        Some(std::mem::replace(
            &mut self.records,
            Vec::with_capacity(self.policy.count_limit()),
        ))
    }
}
