use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::AuditError;

/// Request lifecycle stages, in the only order they may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Validated,
    Enriched,
    Exported,
    Completed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Enriched => "enriched",
            Self::Exported => "exported",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub stage: Stage,
    /// Microseconds since the request was received.
    pub elapsed_us: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Strictly ordered stage events, at most one per stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    pub const MAX_EVENTS: usize = 5;

    pub fn new() -> Self {
        Self {
            events: Vec::with_capacity(Self::MAX_EVENTS),
        }
    }

    /// Append an event. Stages may be skipped but never repeated or
    /// reordered.
    pub fn push(
        &mut self,
        stage: Stage,
        elapsed_us: u64,
        metadata: BTreeMap<String, Value>,
    ) -> Result<(), AuditError> {
        if let Some(last) = self.events.last()
            && stage <= last.stage
        {
            return Err(AuditError::OutOfOrder {
                stage: stage.to_string(),
                last: last.stage.to_string(),
            });
        }
        self.events.push(TimelineEvent {
            stage,
            elapsed_us,
            metadata,
        });
        Ok(())
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.events.iter().map(|e| e.stage).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// One audited inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Trace identifier, echoed in `X-Trace-Id`.
    pub id: String,
    /// Ring position, assigned on append.
    #[serde(default)]
    pub seq: u64,
    pub timestamp_ms: u64,
    pub method: String,
    pub path: String,
    pub client_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub status: u16,
    pub latency_us: u64,
    /// Flow records carried by the request, for EPS.
    #[serde(default)]
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_reason: Option<String>,
    #[serde(default)]
    pub timeline: Timeline,
}

impl AuditRecord {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

#[cfg(test)]
pub(crate) fn make_record(id: &str, status: u16, timestamp_ms: u64) -> AuditRecord {
    AuditRecord {
        id: id.to_string(),
        seq: 0,
        timestamp_ms,
        method: "POST".to_string(),
        path: "/ingest".to_string(),
        client_ip: "10.0.0.1".to_string(),
        tenant_id: Some("tenant-a".to_string()),
        source_id: Some("s1".to_string()),
        status,
        latency_us: 1_000,
        record_count: 10,
        admission_reason: None,
        timeline: Timeline::new(),
    }
}
