use std::net::IpAddr;
use std::sync::Arc;

use domain::admission::entity::{Decision, IntakePath};
use domain::audit::entity::Stage;
use domain::common::entity::current_timestamp_ms;
use domain::ingest::entity::{CanonicalFlow, DeadLetter, IngestCounts, IngestRequest};
use domain::ingest::error::IngestError;
use domain::ingest::mapper::{parse_records, validate_envelope};
use ports::secondary::dead_letter_store::DeadLetterStore;
use ports::secondary::enricher::Enricher;
use ports::secondary::flow_sink::FlowSink;
use ports::secondary::metrics_port::MetricsPort;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::admission_service::AdmissionService;
use crate::audit_trail_service::{RequestTrace, meta};

/// Why an ingest request was not accepted.
#[derive(Debug, Error)]
pub enum IntakeRejection {
    /// Envelope or every record failed validation.
    #[error("{0}")]
    Invalid(IngestError),

    #[error("{0}")]
    TooLarge(IngestError),

    #[error("admission blocked: {}", .0.reason)]
    Blocked(Decision),

    #[error("internal error: {0}")]
    Internal(String),
}

/// HTTP intake pipeline: admission, validation, enrichment, export.
///
/// Stages are marked on the caller's [`RequestTrace`] as they complete,
/// so a request that stops early has no later events.
pub struct IntakeService {
    admission: Arc<AdmissionService>,
    enrichers: Vec<Arc<dyn Enricher>>,
    sinks: Vec<Arc<dyn FlowSink>>,
    dead_letters: Arc<dyn DeadLetterStore>,
    metrics: Arc<dyn MetricsPort>,
    max_records: usize,
}

impl IntakeService {
    pub fn new(
        admission: Arc<AdmissionService>,
        dead_letters: Arc<dyn DeadLetterStore>,
        metrics: Arc<dyn MetricsPort>,
        max_records: usize,
    ) -> Self {
        Self {
            admission,
            enrichers: Vec::new(),
            sinks: Vec::new(),
            dead_letters,
            metrics,
            max_records,
        }
    }

    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn FlowSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    pub async fn ingest(
        &self,
        request: IngestRequest,
        client_ip: IpAddr,
        trace: &RequestTrace,
    ) -> Result<IngestCounts, IntakeRejection> {
        let received = request.records.len();
        trace.set_record_count(received as u64);

        validate_envelope(&request, self.max_records).map_err(|e| match e {
            IngestError::TooManyRecords { .. } => IntakeRejection::TooLarge(e),
            other => IntakeRejection::Invalid(other),
        })?;

        let outcome = self.admission.check(
            IntakePath::Http,
            &request.collector_id,
            client_ip,
            received as u64,
        );
        trace.set_source(&request.collector_id, outcome.tenant_id.clone());
        if outcome.evaluated {
            trace.set_admission_reason(outcome.decision.reason.as_str());
        }
        if !outcome.allowed() {
            return Err(IntakeRejection::Blocked(outcome.decision));
        }

        let (mut flows, errors) = parse_records(&request);
        if flows.is_empty()
            && let Some(first) = errors.into_iter().next()
        {
            return Err(IntakeRejection::Invalid(first));
        }
        let rejected = received - flows.len();
        self.metrics.record_records_parsed(flows.len() as u64);
        let mut validated = meta("accepted", flows.len());
        validated.insert("rejected".to_string(), Value::from(rejected));
        trace.mark(Stage::Validated, validated);

        let annotations = self.enrich(&mut flows);
        let mut enriched = meta("annotations", annotations);
        enriched.insert("enrichers".to_string(), Value::from(self.enrichers.len()));
        trace.mark(Stage::Enriched, enriched);

        let (exported, dead_lettered) = self.export(&request.collector_id, &flows, trace).await?;

        Ok(IngestCounts {
            received,
            accepted: flows.len(),
            rejected,
            exported,
            dead_lettered,
        })
    }

    fn enrich(&self, flows: &mut [CanonicalFlow]) -> usize {
        let mut added = 0;
        for flow in flows.iter_mut() {
            for enricher in &self.enrichers {
                added += enricher.enrich(flow);
            }
        }
        added
    }

    /// Deliver to every sink. Records a sink refused are dead-lettered.
    /// `exported` counts records accepted by all sinks.
    async fn export(
        &self,
        collector_id: &str,
        flows: &[CanonicalFlow],
        trace: &RequestTrace,
    ) -> Result<(usize, usize), IntakeRejection> {
        let mut per_sink = Map::new();
        let mut all_ok = true;
        let mut dead_lettered = 0;

        for sink in &self.sinks {
            if flows.is_empty() {
                break;
            }
            match sink.deliver(flows).await {
                Ok(()) => {
                    self.metrics.record_export(sink.name(), "delivered");
                    per_sink.insert(sink.name().to_string(), Value::from("ok"));
                }
                Err(e) => {
                    all_ok = false;
                    self.metrics.record_export(sink.name(), "failed");
                    per_sink.insert(sink.name().to_string(), Value::from("failed"));
                    tracing::warn!(
                        trace_id = trace.trace_id(),
                        sink = sink.name(),
                        batch_size = flows.len(),
                        error = %e,
                        "sink delivery failed, dead-lettering"
                    );
                    dead_lettered += self.dead_letter(
                        sink.name(),
                        collector_id,
                        flows,
                        &e.to_string(),
                        trace,
                    )?;
                }
            }
        }

        trace.mark(Stage::Exported, meta("sinks", Value::Object(per_sink)));
        let exported = if all_ok { flows.len() } else { 0 };
        Ok((exported, dead_lettered))
    }

    fn dead_letter(
        &self,
        sink: &str,
        collector_id: &str,
        flows: &[CanonicalFlow],
        reason: &str,
        trace: &RequestTrace,
    ) -> Result<usize, IntakeRejection> {
        let payload = serde_json::json!({ "collector_id": collector_id, "records": flows });
        let letter = DeadLetter {
            timestamp_ms: current_timestamp_ms(),
            origin: format!("sink:{sink}"),
            reason: reason.to_string(),
            trace_id: Some(trace.trace_id().to_string()),
            record_count: flows.len(),
            payload: payload.to_string(),
        };
        match self.dead_letters.store(&letter) {
            Ok(()) => {
                self.metrics.record_dead_letter("sink_failed");
                Ok(flows.len())
            }
            Err(e) if self.admission.flags().fail_open => {
                tracing::warn!(
                    trace_id = trace.trace_id(),
                    sink,
                    error = %e,
                    "dead-letter write failed, continuing under fail-open"
                );
                Ok(0)
            }
            Err(e) => Err(IntakeRejection::Internal(format!("dead-letter write failed: {e}"))),
        }
    }
}
