use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use domain::allowlist::entity::{AllowlistDelta, AllowlistSet};
use domain::audit::change::ChangeEntry;
use domain::common::error::DomainError;
use domain::ingest::entity::{CanonicalFlow, DeadLetter};
use domain::ingest::payload::EncodedBatch;
use domain::source::entity::Source;

use crate::secondary::batch_transport::BatchTransport;
use crate::secondary::change_log::ChangeLogSink;
use crate::secondary::dead_letter_store::DeadLetterStore;
use crate::secondary::flow_sink::FlowSink;
use crate::secondary::metrics_port::{
    AdmissionMetrics, ExportMetrics, IntakeMetrics, MapperMetrics, SyncMetrics,
};
use crate::secondary::packet_filter::PacketFilterPort;
use crate::secondary::source_repository::SourceRepository;

// ── Metrics ────────────────────────────────────────────────────────

/// No-op implementation of all metrics sub-traits for use in tests.
pub struct NoopMetrics;

impl AdmissionMetrics for NoopMetrics {}
impl IntakeMetrics for NoopMetrics {}
impl ExportMetrics for NoopMetrics {}
impl MapperMetrics for NoopMetrics {}
impl SyncMetrics for NoopMetrics {}

/// Captures metric calls as strings for assertions.
#[derive(Default)]
pub struct RecordingMetrics {
    pub events: Mutex<Vec<String>>,
}

impl RecordingMetrics {
    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl AdmissionMetrics for RecordingMetrics {
    fn record_admission(&self, path: &str, source: &str, reason: &str, allowed: bool) {
        self.push(format!("admission:{path}:{source}:{reason}:{allowed}"));
    }
}

impl IntakeMetrics for RecordingMetrics {
    fn record_udp_packet(&self) {
        self.push("udp_packet".to_string());
    }

    fn record_records_parsed(&self, count: u64) {
        self.push(format!("records_parsed:{count}"));
    }

    fn record_fifo_dropped(&self) {
        self.push("fifo_dropped".to_string());
    }
}

impl ExportMetrics for RecordingMetrics {
    fn record_export(&self, sink: &str, outcome: &str) {
        self.push(format!("export:{sink}:{outcome}"));
    }

    fn record_dead_letter(&self, reason: &str) {
        self.push(format!("dead_letter:{reason}"));
    }
}

impl MapperMetrics for RecordingMetrics {
    fn record_mapper_batch(&self, outcome: &str) {
        self.push(format!("mapper:{outcome}"));
    }
}

impl SyncMetrics for RecordingMetrics {
    fn record_allowlist_sync(&self, status: &str) {
        self.push(format!("sync:{status}"));
    }
}

// ── Source repository ──────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySourceRepository {
    sources: Mutex<BTreeMap<String, Source>>,
    pub fail_reads: AtomicBool,
}

impl InMemorySourceRepository {
    pub fn with_sources(sources: Vec<Source>) -> Self {
        let repo = Self::default();
        if let Ok(mut map) = repo.sources.lock() {
            for s in sources {
                map.insert(s.id.clone(), s);
            }
        }
        repo
    }

    fn map(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Source>>, DomainError> {
        self.sources
            .lock()
            .map_err(|_| DomainError::EngineError("lock poisoned".into()))
    }
}

impl SourceRepository for InMemorySourceRepository {
    fn list(&self) -> Result<Vec<Source>, DomainError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(DomainError::Unavailable("store offline".into()));
        }
        Ok(self.map()?.values().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Option<Source>, DomainError> {
        Ok(self.map()?.get(id).cloned())
    }

    fn create(&self, source: &Source) -> Result<(), DomainError> {
        let mut map = self.map()?;
        if map.contains_key(&source.id) {
            return Err(DomainError::Duplicate(source.id.clone()));
        }
        map.insert(source.id.clone(), source.clone());
        Ok(())
    }

    fn update(&self, source: &Source) -> Result<(), DomainError> {
        let mut map = self.map()?;
        if !map.contains_key(&source.id) {
            return Err(DomainError::NotFound(source.id.clone()));
        }
        map.insert(source.id.clone(), source.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), DomainError> {
        self.map()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DomainError::NotFound(id.to_string()))
    }
}

// ── Packet filter ──────────────────────────────────────────────────

/// In-memory packet filter that records every applied delta.
pub struct FakePacketFilter {
    pub available: AtomicBool,
    pub set: Mutex<AllowlistSet>,
    pub applied: Mutex<Vec<AllowlistDelta>>,
}

impl FakePacketFilter {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
            set: Mutex::new(AllowlistSet::default()),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> AllowlistSet {
        self.set.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn apply_count(&self) -> usize {
        self.applied.lock().map(|a| a.len()).unwrap_or(0)
    }
}

impl PacketFilterPort for FakePacketFilter {
    fn available(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { self.available.load(Ordering::Relaxed) })
    }

    fn current_set(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<AllowlistSet, DomainError>> + Send + '_>> {
        Box::pin(async move {
            if !self.available.load(Ordering::Relaxed) {
                return Err(DomainError::Unavailable("fake filter offline".into()));
            }
            Ok(self.snapshot())
        })
    }

    fn apply<'a>(
        &'a self,
        delta: &'a AllowlistDelta,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.available.load(Ordering::Relaxed) {
                return Err(DomainError::Unavailable("fake filter offline".into()));
            }
            let mut set = self
                .set
                .lock()
                .map_err(|_| DomainError::EngineError("lock poisoned".into()))?;
            for net in delta.add_v4.iter().chain(&delta.add_v6) {
                set.insert(*net);
            }
            for net in &delta.remove_v4 {
                set.v4.remove(net);
            }
            for net in &delta.remove_v6 {
                set.v6.remove(net);
            }
            if let Ok(mut applied) = self.applied.lock() {
                applied.push(delta.clone());
            }
            Ok(())
        })
    }
}

// ── Flow sink ──────────────────────────────────────────────────────

/// Sink that stores delivered flows and can be told to fail.
pub struct RecordingSink {
    name: String,
    pub fail: AtomicBool,
    pub delivered: Mutex<Vec<CanonicalFlow>>,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: AtomicBool::new(false),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str) -> Self {
        let sink = Self::new(name);
        sink.fail.store(true, Ordering::Relaxed);
        sink
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().map(|d| d.len()).unwrap_or(0)
    }
}

impl FlowSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver<'a>(
        &'a self,
        flows: &'a [CanonicalFlow],
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail.load(Ordering::Relaxed) {
                return Err(DomainError::Unavailable(format!("{} is down", self.name)));
            }
            if let Ok(mut delivered) = self.delivered.lock() {
                delivered.extend_from_slice(flows);
            }
            Ok(())
        })
    }
}

// ── Dead letters / change log ──────────────────────────────────────

#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    pub letters: Mutex<Vec<DeadLetter>>,
    pub fail_writes: AtomicBool,
}

impl DeadLetterStore for InMemoryDeadLetterStore {
    fn store(&self, letter: &DeadLetter) -> Result<(), DomainError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(DomainError::EngineError("dead-letter store unavailable".into()));
        }
        self.letters
            .lock()
            .map_err(|_| DomainError::EngineError("lock poisoned".into()))?
            .push(letter.clone());
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<DeadLetter>, DomainError> {
        let letters = self
            .letters
            .lock()
            .map_err(|_| DomainError::EngineError("lock poisoned".into()))?;
        Ok(letters.iter().rev().take(limit).cloned().collect())
    }

    fn count(&self) -> Result<usize, DomainError> {
        Ok(self.letters.lock().map(|l| l.len()).unwrap_or(0))
    }
}

#[derive(Default)]
pub struct InMemoryChangeLog {
    pub entries: Mutex<Vec<ChangeEntry>>,
}

impl ChangeLogSink for InMemoryChangeLog {
    fn record(&self, entry: &ChangeEntry) -> Result<(), DomainError> {
        self.entries
            .lock()
            .map_err(|_| DomainError::EngineError("lock poisoned".into()))?
            .push(entry.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<ChangeEntry>, DomainError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| DomainError::EngineError("lock poisoned".into()))?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

// ── Batch transport ────────────────────────────────────────────────

/// Scripted transport. Each `send` pops the next response; once the
/// script runs out every send answers `default_status`. A `respond`
/// closure, when set, overrides the script.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<u16, DomainError>>>,
    default_status: u16,
    respond: Option<Box<dyn Fn(&EncodedBatch) -> u16 + Send + Sync>>,
    pub sent: Mutex<Vec<(usize, bool, String)>>,
    pub calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<u16, DomainError>>, default_status: u16) -> Self {
        Self {
            script: Mutex::new(script.into()),
            default_status,
            respond: None,
            sent: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_responder(respond: impl Fn(&EncodedBatch) -> u16 + Send + Sync + 'static) -> Self {
        Self {
            respond: Some(Box::new(respond)),
            ..Self::new(Vec::new(), 200)
        }
    }

    /// `(record_count, gzipped, trace_id)` for every send, in order.
    pub fn sent(&self) -> Vec<(usize, bool, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl BatchTransport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        batch: &'a EncodedBatch,
        trace_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u16, DomainError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((batch.record_count, batch.gzipped, trace_id.to_string()));
            }
            if let Some(ref respond) = self.respond {
                return Ok(respond(batch));
            }
            self.script
                .lock()
                .ok()
                .and_then(|mut s| s.pop_front())
                .unwrap_or(Ok(self.default_status))
        })
    }
}
