use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shape of the records inside an ingest request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// Already canonical; sent by the mapper.
    #[default]
    Canonical,
    /// Collector-native structured records (goflow-style keys, ns
    /// timestamps, numeric protocols). Canonicalized on intake.
    Raw,
}

/// Body of `POST /ingest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub collector_id: String,
    #[serde(default)]
    pub format: RecordFormat,
    pub records: Vec<Value>,
}

/// Outbound form of [`IngestRequest`] built by the mapper without
/// round-tripping through `Value`.
#[derive(Debug, Serialize)]
pub struct IngestBatchRef<'a> {
    pub collector_id: &'a str,
    pub format: RecordFormat,
    pub records: &'a [CanonicalFlow],
}

/// Canonical flow record.
///
/// Timestamps are whole seconds since epoch, protocol is a lowercase
/// name. Enrichers add to `annotations`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanonicalFlow {
    #[serde(default)]
    pub time_received: u64,
    #[serde(default)]
    pub time_flow_start: u64,
    #[serde(default)]
    pub time_flow_end: u64,
    pub src_addr: String,
    pub dst_addr: String,
    #[serde(default)]
    pub src_port: u16,
    #[serde(default)]
    pub dst_port: u16,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub packets: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_rate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_if: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_if: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_flags: Option<u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, Value>,
}

/// Per-request intake tally returned with a 200.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCounts {
    pub received: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub exported: usize,
    pub dead_lettered: usize,
}

/// A payload that could not be delivered, kept for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub timestamp_ms: u64,
    /// `mapper` or `sink:<name>`.
    pub origin: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub record_count: usize,
    /// Original JSON payload.
    pub payload: String,
}
