use std::sync::Arc;
use std::time::Instant;

use domain::common::entity::current_timestamp_ms;
use domain::ingest::backoff::{BackoffPolicy, RetryStep};
use domain::ingest::batcher::{BatchPolicy, Batcher};
use domain::ingest::entity::{CanonicalFlow, DeadLetter, IngestBatchRef, RecordFormat};
use domain::ingest::error::IngestError;
use domain::ingest::mapper::{canonicalize, parse_canonical};
use domain::ingest::payload::{EncodedBatch, PayloadLimits, encode_batch};
use ports::secondary::batch_transport::BatchTransport;
use ports::secondary::dead_letter_store::DeadLetterStore;
use ports::secondary::metrics_port::MetricsPort;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Mapper tuning.
#[derive(Debug, Clone)]
pub struct MapperSettings {
    pub collector_id: String,
    /// Shape of the incoming records.
    pub input_format: RecordFormat,
    pub batch: BatchPolicy,
    pub limits: PayloadLimits,
    pub backoff: BackoffPolicy,
    /// Batches at or below this size are dead-lettered instead of split.
    pub min_split_size: usize,
}

/// Tally of one delivery or a whole mapper run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MapperReport {
    pub accepted: usize,
    pub dead_lettered: usize,
    /// Records that could not be delivered nor dead-lettered.
    pub lost: usize,
    /// Records that could not be canonicalized.
    pub invalid: usize,
    pub batches_sent: usize,
    pub splits: usize,
    pub retries: usize,
}

impl MapperReport {
    fn merge(&mut self, other: &Self) {
        self.accepted += other.accepted;
        self.dead_lettered += other.dead_lettered;
        self.lost += other.lost;
        self.invalid += other.invalid;
        self.batches_sent += other.batches_sent;
        self.splits += other.splits;
        self.retries += other.retries;
    }
}

/// How one send of one encoded batch ended.
enum SendOutcome {
    Accepted(u16),
    TooLarge,
    Rejected(u16),
    Exhausted(String),
    Cancelled(String),
}

/// Batches canonical records and delivers them to the gateway.
///
/// Delivery is a bounded state machine per batch: 2xx accepts, 413
/// splits in half, 429/5xx/network errors back off and retry, any other
/// 4xx is final. Whatever cannot be delivered is dead-lettered with its
/// original payload.
pub struct MapperService {
    transport: Arc<dyn BatchTransport>,
    dead_letters: Arc<dyn DeadLetterStore>,
    metrics: Arc<dyn MetricsPort>,
    settings: MapperSettings,
}

impl MapperService {
    pub fn new(
        transport: Arc<dyn BatchTransport>,
        dead_letters: Arc<dyn DeadLetterStore>,
        metrics: Arc<dyn MetricsPort>,
        settings: MapperSettings,
    ) -> Self {
        Self {
            transport,
            dead_letters,
            metrics,
            settings,
        }
    }

    /// Consume raw records until the channel closes or `cancel` fires,
    /// then flush what is left.
    pub async fn run(&self, mut input: mpsc::Receiver<Value>, cancel: CancellationToken) -> MapperReport {
        let mut batcher = Batcher::new(self.settings.batch);
        let mut report = MapperReport::default();
        let mut index = 0usize;

        loop {
            let deadline = batcher.deadline();
            tokio::select! {
                () = cancel.cancelled() => break,
                maybe = input.recv() => {
                    let Some(raw) = maybe else { break };
                    match self.convert(&raw, index) {
                        Ok(flow) => {
                            if let Some(batch) = batcher.push(flow, Instant::now()) {
                                report.merge(&self.deliver(batch, &cancel).await);
                            }
                        }
                        Err(e) => {
                            report.invalid += 1;
                            tracing::warn!(index, error = %e, "skipping unmappable record");
                        }
                    }
                    index += 1;
                }
                () = wait_until(deadline) => {
                    if let Some(batch) = batcher.poll(Instant::now()) {
                        report.merge(&self.deliver(batch, &cancel).await);
                    }
                }
            }
        }

        if let Some(batch) = batcher.take() {
            report.merge(&self.deliver(batch, &cancel).await);
        }
        tracing::info!(
            accepted = report.accepted,
            dead_lettered = report.dead_lettered,
            lost = report.lost,
            invalid = report.invalid,
            batches = report.batches_sent,
            splits = report.splits,
            "mapper stopped"
        );
        report
    }

    fn convert(&self, raw: &Value, index: usize) -> Result<CanonicalFlow, IngestError> {
        match self.settings.input_format {
            RecordFormat::Raw => canonicalize(raw, index),
            RecordFormat::Canonical => parse_canonical(raw, index),
        }
    }

    /// Deliver one batch, splitting on size limits.
    ///
    /// Work is an explicit stack: each split replaces a batch with two
    /// strictly smaller ones, so the loop ends once every piece is
    /// accepted or at `min_split_size`.
    pub async fn deliver(&self, records: Vec<CanonicalFlow>, cancel: &CancellationToken) -> MapperReport {
        let mut report = MapperReport::default();
        let mut work = vec![records];

        while let Some(batch) = work.pop() {
            if batch.is_empty() {
                continue;
            }
            let trace_id = Uuid::new_v4().to_string();
            let encoded = match encode_batch(&self.settings.collector_id, &batch, self.settings.limits) {
                Ok(encoded) => encoded,
                Err(IngestError::PayloadTooLarge { size, limit, .. }) => {
                    let reason = format!("encoded payload {size} bytes exceeds {limit}");
                    self.split_or_dead_letter(batch, &mut work, &mut report, &reason, &trace_id);
                    continue;
                }
                Err(e) => {
                    self.dead_letter(&batch, "encoding", &e.to_string(), &trace_id, &mut report);
                    continue;
                }
            };

            report.batches_sent += 1;
            match self.send_with_retry(&encoded, &trace_id, cancel, &mut report).await {
                SendOutcome::Accepted(status) => {
                    report.accepted += batch.len();
                    self.metrics.record_mapper_batch("accepted");
                    tracing::info!(
                        trace_id,
                        batch_size = batch.len(),
                        bytes = encoded.body.len(),
                        gzipped = encoded.gzipped,
                        status,
                        "batch delivered"
                    );
                }
                SendOutcome::TooLarge => {
                    self.split_or_dead_letter(batch, &mut work, &mut report, "gateway answered 413", &trace_id);
                }
                SendOutcome::Rejected(status) => {
                    let reason = format!("gateway rejected batch with status {status}");
                    self.dead_letter(&batch, "rejected", &reason, &trace_id, &mut report);
                }
                SendOutcome::Exhausted(reason) => {
                    self.dead_letter(&batch, "retries_exhausted", &reason, &trace_id, &mut report);
                }
                SendOutcome::Cancelled(reason) => {
                    let reason = format!("shutdown during backoff: {reason}");
                    self.dead_letter(&batch, "shutdown", &reason, &trace_id, &mut report);
                }
            }
        }
        report
    }

    async fn send_with_retry(
        &self,
        batch: &EncodedBatch,
        trace_id: &str,
        cancel: &CancellationToken,
        report: &mut MapperReport,
    ) -> SendOutcome {
        let mut state = self.settings.backoff.start();
        loop {
            let attempt = tokio::time::timeout(state.attempt_timeout(), self.transport.send(batch, trace_id)).await;
            let failure = match attempt {
                Ok(Ok(status)) if (200..300).contains(&status) => return SendOutcome::Accepted(status),
                Ok(Ok(413)) => return SendOutcome::TooLarge,
                Ok(Ok(status)) if status == 429 || status >= 500 => format!("status {status}"),
                Ok(Ok(status)) => return SendOutcome::Rejected(status),
                Ok(Err(e)) => e.to_string(),
                Err(_elapsed) => format!("timed out after {:?}", state.attempt_timeout()),
            };

            match state.on_failure() {
                RetryStep::Exhausted => {
                    return SendOutcome::Exhausted(format!(
                        "{failure} after {} attempts",
                        state.attempts()
                    ));
                }
                RetryStep::RetryAfter(delay) => {
                    report.retries += 1;
                    self.metrics.record_mapper_batch("retried");
                    tracing::warn!(
                        trace_id,
                        batch_size = batch.record_count,
                        attempt = state.attempts(),
                        ?delay,
                        error = %failure,
                        "delivery failed, backing off"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return SendOutcome::Cancelled(failure),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn split_or_dead_letter(
        &self,
        mut batch: Vec<CanonicalFlow>,
        work: &mut Vec<Vec<CanonicalFlow>>,
        report: &mut MapperReport,
        reason: &str,
        trace_id: &str,
    ) {
        if batch.len() <= self.settings.min_split_size.max(1) {
            self.dead_letter(&batch, "payload_too_large", reason, trace_id, report);
            return;
        }
        let right = batch.split_off(batch.len() / 2);
        tracing::info!(
            trace_id,
            left = batch.len(),
            right = right.len(),
            reason,
            "splitting oversized batch"
        );
        // Left half is popped first so record order is kept.
        work.push(right);
        work.push(batch);
        report.splits += 1;
        self.metrics.record_mapper_batch("split");
    }

    fn dead_letter(
        &self,
        batch: &[CanonicalFlow],
        kind: &str,
        reason: &str,
        trace_id: &str,
        report: &mut MapperReport,
    ) {
        let encoded = serde_json::to_string(&IngestBatchRef {
            collector_id: &self.settings.collector_id,
            format: RecordFormat::Canonical,
            records: batch,
        });
        let payload = match encoded {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(trace_id, error = %e, "dead-letter encoding failed, records lost");
                self.record_lost(batch.len(), report);
                return;
            }
        };
        let letter = DeadLetter {
            timestamp_ms: current_timestamp_ms(),
            origin: "mapper".to_string(),
            reason: reason.to_string(),
            trace_id: Some(trace_id.to_string()),
            record_count: batch.len(),
            payload,
        };
        tracing::warn!(trace_id, batch_size = batch.len(), kind, reason, "dead-lettering batch");
        if let Err(e) = self.dead_letters.store(&letter) {
            tracing::error!(trace_id, error = %e, "dead-letter write failed, records lost");
            self.record_lost(batch.len(), report);
            return;
        }
        report.dead_lettered += batch.len();
        self.metrics.record_dead_letter(kind);
        self.metrics.record_mapper_batch("dead_lettered");
    }

    fn record_lost(&self, count: usize, report: &mut MapperReport) {
        report.lost += count;
        self.metrics.record_mapper_batch("lost");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
