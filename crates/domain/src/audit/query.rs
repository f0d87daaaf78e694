use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::entity::AuditRecord;

/// Filters for the request audit window.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestQuery {
    pub method: Option<String>,
    /// Matches when the record path starts with this prefix.
    pub path: Option<String>,
    pub status_min: Option<u16>,
    pub status_max: Option<u16>,
    pub tenant_id: Option<String>,
    pub source_id: Option<String>,
    pub trace_id: Option<String>,
    /// Inclusive lower bound, milliseconds since epoch.
    pub since_ms: Option<u64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl RequestQuery {
    pub const DEFAULT_LIMIT: usize = 100;
    pub const MAX_LIMIT: usize = 1000;

    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(ref method) = self.method
            && !record.method.eq_ignore_ascii_case(method)
        {
            return false;
        }
        if let Some(ref prefix) = self.path
            && !record.path.starts_with(prefix.as_str())
        {
            return false;
        }
        if let Some(min) = self.status_min
            && record.status < min
        {
            return false;
        }
        if let Some(max) = self.status_max
            && record.status > max
        {
            return false;
        }
        if let Some(ref tenant) = self.tenant_id
            && record.tenant_id.as_deref() != Some(tenant.as_str())
        {
            return false;
        }
        if let Some(ref source) = self.source_id
            && record.source_id.as_deref() != Some(source.as_str())
        {
            return false;
        }
        if let Some(ref trace) = self.trace_id
            && record.id != *trace
        {
            return false;
        }
        if let Some(since) = self.since_ms
            && record.timestamp_ms < since
        {
            return false;
        }
        true
    }

    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
    }

    /// Filter `records` (oldest first) and return a newest-first page.
    pub fn page<'a, I>(&self, records: I) -> (Vec<Arc<AuditRecord>>, usize)
    where
        I: DoubleEndedIterator<Item = &'a Arc<AuditRecord>>,
    {
        let matching: Vec<&Arc<AuditRecord>> = records.rev().filter(|r| self.matches(r)).collect();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.effective_limit())
            .cloned()
            .collect();
        (items, total)
    }
}

/// Aggregate over the recent audit window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub window_secs: u64,
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    /// `successes / requests`; `1.0` for an empty window.
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    /// Flow records per second across the window.
    pub eps: f64,
    pub records: u64,
}

impl WindowSummary {
    #[allow(clippy::cast_precision_loss)]
    pub fn compute<'a, I>(records: I, now_ms: u64, window_secs: u64) -> Self
    where
        I: IntoIterator<Item = &'a Arc<AuditRecord>>,
    {
        let window_secs = window_secs.max(1);
        let from = now_ms.saturating_sub(window_secs * 1000);
        let mut requests = 0u64;
        let mut successes = 0u64;
        let mut latency_total_us = 0u64;
        let mut flow_records = 0u64;

        for r in records.into_iter().filter(|r| r.timestamp_ms >= from) {
            requests += 1;
            if r.is_success() {
                successes += 1;
            }
            latency_total_us = latency_total_us.saturating_add(r.latency_us);
            flow_records = flow_records.saturating_add(r.record_count);
        }

        let (success_rate, avg_latency_ms) = if requests == 0 {
            (1.0, 0.0)
        } else {
            (
                successes as f64 / requests as f64,
                latency_total_us as f64 / requests as f64 / 1000.0,
            )
        };

        Self {
            window_secs,
            requests,
            successes,
            errors: requests - successes,
            success_rate,
            avg_latency_ms,
            eps: flow_records as f64 / window_secs as f64,
            records: flow_records,
        }
    }
}
