// Focused sub-traits for recording Prometheus metrics, grouped by concern.
//
// All methods take `&self`; implementations use atomics.
//
// Default implementations are no-ops, allowing test mocks to implement
// only the sub-traits relevant to the service under test.

// ── Admission metrics ──────────────────────────────────────────────

pub trait AdmissionMetrics: Send + Sync {
    /// Record one admission decision. Non-`ok` reasons also count toward
    /// `blocked_source_total{source, reason}` whether or not the block
    /// was enforced.
    fn record_admission(&self, _path: &str, _source: &str, _reason: &str, _allowed: bool) {}
}

// ── Intake metrics ─────────────────────────────────────────────────

pub trait IntakeMetrics: Send + Sync {
    fn record_udp_packet(&self) {}

    fn record_records_parsed(&self, _count: u64) {}

    fn record_fifo_dropped(&self) {}
}

// ── Export metrics ─────────────────────────────────────────────────

pub trait ExportMetrics: Send + Sync {
    /// `outcome` is `delivered`, `failed` or `circuit_open`.
    fn record_export(&self, _sink: &str, _outcome: &str) {}

    /// `reason` is a short code such as `sink_failed`, `payload_too_large`
    /// or `retries_exhausted`.
    fn record_dead_letter(&self, _reason: &str) {}
}

// ── Mapper metrics ─────────────────────────────────────────────────

pub trait MapperMetrics: Send + Sync {
    /// `outcome` is `accepted`, `split`, `retried`, `dead_lettered` or `lost`.
    fn record_mapper_batch(&self, _outcome: &str) {}
}

// ── Allowlist sync metrics ─────────────────────────────────────────

pub trait SyncMetrics: Send + Sync {
    fn record_allowlist_sync(&self, _status: &str) {}
}

// ── Composite super-trait ──────────────────────────────────────────

/// Unified metrics port composing all sub-traits.
///
/// Services accept `Arc<dyn MetricsPort>`.
pub trait MetricsPort:
    AdmissionMetrics + IntakeMetrics + ExportMetrics + MapperMetrics + SyncMetrics
{
}

impl<T> MetricsPort for T where
    T: AdmissionMetrics + IntakeMetrics + ExportMetrics + MapperMetrics + SyncMetrics
{
}
