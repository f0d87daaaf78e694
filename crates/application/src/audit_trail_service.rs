use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use domain::audit::entity::{AuditRecord, Stage, Timeline};
use domain::audit::query::{RequestQuery, WindowSummary};
use domain::audit::ring::{AuditRing, PollResult};
use domain::audit::sampler::AuditSampler;
use domain::common::entity::current_timestamp_ms;
use serde_json::Value;
use tokio::sync::broadcast;

const STREAM_CAPACITY: usize = 256;

/// One page of a filtered audit query.
#[derive(Debug, Clone)]
pub struct RequestPage {
    pub items: Vec<Arc<AuditRecord>>,
    pub total: usize,
    /// Ring head at query time.
    pub etag: u64,
}

/// Bounded, in-memory record of recent requests.
///
/// Appends are serialized behind a write lock; the ring assigns each
/// record a monotonic sequence used as the poll ETag. New records are
/// also fanned out to live stream subscribers.
pub struct AuditTrailService {
    ring: RwLock<AuditRing>,
    sampler: AuditSampler,
    stream: broadcast::Sender<Arc<AuditRecord>>,
}

impl AuditTrailService {
    pub fn new(capacity: usize, sampler: AuditSampler) -> Self {
        let (stream, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            ring: RwLock::new(AuditRing::new(capacity)),
            sampler,
            stream,
        }
    }

    /// Whether requests on `path` are audited at all.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.sampler.is_excluded(path)
    }

    /// Append if the sampler keeps it. Returns the assigned sequence.
    pub fn offer(&self, record: AuditRecord) -> Option<u64> {
        if !self
            .sampler
            .should_record(&record.path, record.status, &record.id)
        {
            return None;
        }
        Some(self.append(record))
    }

    /// Append unconditionally.
    ///
    /// The broadcast happens under the write lock so subscribers see
    /// sequences in ring order.
    pub fn append(&self, record: AuditRecord) -> u64 {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        let stored = ring.push(record);
        // No subscribers is the normal case.
        let _ = self.stream.send(Arc::clone(&stored));
        stored.seq
    }

    pub fn head(&self) -> u64 {
        self.ring.read().unwrap_or_else(PoisonError::into_inner).head()
    }

    pub fn len(&self) -> usize {
        self.ring.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records newer than `etag`, or `NotModified`.
    pub fn poll(&self, etag: Option<u64>) -> PollResult {
        self.ring.read().unwrap_or_else(PoisonError::into_inner).poll(etag)
    }

    /// Filtered page, newest first.
    pub fn query(&self, query: &RequestQuery) -> RequestPage {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        let (items, total) = query.page(ring.iter());
        RequestPage {
            items,
            total,
            etag: ring.head(),
        }
    }

    pub fn summary(&self, window_secs: u64) -> WindowSummary {
        self.summary_at(current_timestamp_ms(), window_secs)
    }

    pub fn summary_at(&self, now_ms: u64, window_secs: u64) -> WindowSummary {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        WindowSummary::compute(ring.iter(), now_ms, window_secs)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AuditRecord>> {
        self.stream.subscribe()
    }
}

// ── Per-request trace ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct TraceState {
    timeline: Timeline,
    tenant_id: Option<String>,
    source_id: Option<String>,
    record_count: u64,
    admission_reason: Option<String>,
}

/// Timeline under construction for one in-flight request.
///
/// Created by the HTTP layer on arrival, annotated by handlers as the
/// request moves through the pipeline, and turned into an
/// [`AuditRecord`] on completion.
#[derive(Debug)]
pub struct RequestTrace {
    trace_id: String,
    started: Instant,
    started_ms: u64,
    state: Mutex<TraceState>,
}

impl RequestTrace {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            started: Instant::now(),
            started_ms: current_timestamp_ms(),
            state: Mutex::new(TraceState::default()),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn elapsed_us(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Record a stage. Out-of-order stages are dropped with a warning so
    /// a handler bug cannot fail the request.
    pub fn mark(&self, stage: Stage, metadata: BTreeMap<String, Value>) {
        let elapsed = self.elapsed_us();
        let mut state = self.lock();
        if let Err(e) = state.timeline.push(stage, elapsed, metadata) {
            tracing::warn!(trace_id = %self.trace_id, error = %e, "timeline event rejected");
        }
    }

    pub fn set_source(&self, source_id: &str, tenant_id: Option<String>) {
        let mut state = self.lock();
        state.source_id = Some(source_id.to_string());
        state.tenant_id = tenant_id;
    }

    pub fn set_record_count(&self, count: u64) {
        self.lock().record_count = count;
    }

    pub fn set_admission_reason(&self, reason: &str) {
        self.lock().admission_reason = Some(reason.to_string());
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.lock().timeline.stages()
    }

    /// Close the timeline with `completed` and build the audit record.
    pub fn finish(&self, method: &str, path: &str, client_ip: &str, status: u16) -> AuditRecord {
        let latency_us = self.elapsed_us();
        let mut completed = BTreeMap::new();
        completed.insert("status".to_string(), Value::from(status));
        completed.insert("latency_us".to_string(), Value::from(latency_us));
        self.mark(Stage::Completed, completed);

        let state = std::mem::take(&mut *self.lock());
        AuditRecord {
            id: self.trace_id.clone(),
            seq: 0,
            timestamp_ms: self.started_ms,
            method: method.to_string(),
            path: path.to_string(),
            client_ip: client_ip.to_string(),
            tenant_id: state.tenant_id,
            source_id: state.source_id,
            status,
            latency_us,
            record_count: state.record_count,
            admission_reason: state.admission_reason,
            timeline: state.timeline,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Build single-entry timeline metadata.
pub fn meta(key: &str, value: impl Into<Value>) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), value.into());
    map
}
