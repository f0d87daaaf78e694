use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use ports::secondary::metrics_port::{
    AdmissionMetrics, ExportMetrics, IntakeMetrics, MapperMetrics, SyncMetrics,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use serde::Serialize;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, EncodeLabelSet)]
pub struct BlockedLabels {
    pub source: String,
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
    pub path: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SinkLabels {
    pub sink: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Point-in-time counter values for the JSON metrics view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub udp_packets_received_total: u64,
    pub records_parsed_total: u64,
    pub fifo_dropped_total: u64,
    /// source → reason → count.
    pub blocked_source_total: BTreeMap<String, BTreeMap<String, u64>>,
}

// ── Gateway metrics registry ────────────────────────────────────────

/// Prometheus metrics registry for the gateway.
///
/// All metric families use interior mutability (atomics), so recording
/// metrics only requires `&self`. Wrap in `Arc` to share across tasks.
pub struct GatewayMetrics {
    registry: Registry,
    pub blocked_source_total: Family<BlockedLabels, Counter>,
    pub admission_decisions_total: Family<DecisionLabels, Counter>,
    pub udp_packets_received_total: Counter,
    pub records_parsed_total: Counter,
    pub fifo_dropped_total: Counter,
    pub export_total: Family<SinkLabels, Counter>,
    pub dead_letter_total: Family<ReasonLabels, Counter>,
    pub mapper_batches_total: Family<OutcomeLabels, Counter>,
    pub allowlist_sync_total: Family<OutcomeLabels, Counter>,
    blocked_keys: Mutex<BTreeSet<BlockedLabels>>,
}

impl GatewayMetrics {
    /// Create a registry with every metric registered under the
    /// `flowgate` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("flowgate");

        let blocked_source_total = Family::<BlockedLabels, Counter>::default();
        registry.register(
            "blocked_source",
            "Admission checks with a non-ok reason, enforced or not",
            blocked_source_total.clone(),
        );

        let admission_decisions_total = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "admission_decisions",
            "Admission decisions by intake path and final outcome",
            admission_decisions_total.clone(),
        );

        let udp_packets_received_total = Counter::default();
        registry.register(
            "udp_packets_received",
            "Datagrams received on the UDP intake",
            udp_packets_received_total.clone(),
        );

        let records_parsed_total = Counter::default();
        registry.register(
            "records_parsed",
            "Flow records parsed by the intake pipeline",
            records_parsed_total.clone(),
        );

        let fifo_dropped_total = Counter::default();
        registry.register(
            "fifo_dropped",
            "Admitted datagrams dropped because the forwarding queue was full",
            fifo_dropped_total.clone(),
        );

        let export_total = Family::<SinkLabels, Counter>::default();
        registry.register(
            "export",
            "Sink delivery attempts by outcome",
            export_total.clone(),
        );

        let dead_letter_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "dead_letter",
            "Payloads written to the dead-letter store",
            dead_letter_total.clone(),
        );

        let mapper_batches_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "mapper_batches",
            "Mapper batch events (accepted, split, retried, dead_lettered, lost)",
            mapper_batches_total.clone(),
        );

        let allowlist_sync_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "allowlist_sync",
            "Kernel allowlist sync runs by status",
            allowlist_sync_total.clone(),
        );

        Self {
            registry,
            blocked_source_total,
            admission_decisions_total,
            udp_packets_received_total,
            records_parsed_total,
            fifo_dropped_total,
            export_total,
            dead_letter_total,
            mapper_batches_total,
            allowlist_sync_total,
            blocked_keys: Mutex::new(BTreeSet::new()),
        }
    }

    /// Encode all registered metrics to `OpenMetrics` text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "metrics encoding failed");
        }
        buffer
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let keys = self
            .blocked_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut blocked: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        for labels in keys {
            let count = self.blocked_source_total.get_or_create(&labels).get();
            blocked
                .entry(labels.source)
                .or_default()
                .insert(labels.reason, count);
        }
        CounterSnapshot {
            udp_packets_received_total: self.udp_packets_received_total.get(),
            records_parsed_total: self.records_parsed_total.get(),
            fifo_dropped_total: self.fifo_dropped_total.get(),
            blocked_source_total: blocked,
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ── Sub-trait implementations ──────────────────────────────────────

impl AdmissionMetrics for GatewayMetrics {
    fn record_admission(&self, path: &str, source: &str, reason: &str, allowed: bool) {
        self.admission_decisions_total
            .get_or_create(&DecisionLabels {
                path: path.to_string(),
                outcome: if allowed { "allowed" } else { "blocked" }.to_string(),
            })
            .inc();
        if reason == "ok" {
            return;
        }
        let labels = BlockedLabels {
            source: source.to_string(),
            reason: reason.to_string(),
        };
        self.blocked_source_total.get_or_create(&labels).inc();
        self.blocked_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(labels);
    }
}

impl IntakeMetrics for GatewayMetrics {
    fn record_udp_packet(&self) {
        self.udp_packets_received_total.inc();
    }

    fn record_records_parsed(&self, count: u64) {
        self.records_parsed_total.inc_by(count);
    }

    fn record_fifo_dropped(&self) {
        self.fifo_dropped_total.inc();
    }
}

impl ExportMetrics for GatewayMetrics {
    fn record_export(&self, sink: &str, outcome: &str) {
        self.export_total
            .get_or_create(&SinkLabels {
                sink: sink.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    fn record_dead_letter(&self, reason: &str) {
        self.dead_letter_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }
}

impl MapperMetrics for GatewayMetrics {
    fn record_mapper_batch(&self, outcome: &str) {
        self.mapper_batches_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }
}

impl SyncMetrics for GatewayMetrics {
    fn record_allowlist_sync(&self, status: &str) {
        self.allowlist_sync_total
            .get_or_create(&OutcomeLabels {
                outcome: status.to_string(),
            })
            .inc();
    }
}

// MetricsPort is implemented by the blanket impl.
