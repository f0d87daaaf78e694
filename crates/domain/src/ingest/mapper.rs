use std::collections::BTreeMap;
use std::net::IpAddr;

use serde_json::{Map, Value};

use super::entity::{CanonicalFlow, IngestRequest, RecordFormat};
use super::error::IngestError;
use crate::common::entity::validate_identifier;

/// IANA protocol numbers with conventional names.
pub fn protocol_name(number: u64) -> Option<&'static str> {
    Some(match number {
        1 => "icmp",
        2 => "igmp",
        6 => "tcp",
        17 => "udp",
        41 => "ipv6",
        47 => "gre",
        50 => "esp",
        51 => "ah",
        58 => "icmpv6",
        89 => "ospf",
        132 => "sctp",
        _ => return None,
    })
}

/// `TimeFlowStartNs` → `time_flow_start_ns`; snake_case passes through.
fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    out
}

/// Field lookup over a normalized-key view of a raw record.
struct RawRecord {
    fields: Map<String, Value>,
}

impl RawRecord {
    fn new(obj: &Map<String, Value>) -> Self {
        let fields = obj.iter().map(|(k, v)| (snake_case(k), v.clone())).collect();
        Self { fields }
    }

    fn first(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|k| self.fields.get(*k).filter(|v| !v.is_null()))
    }

    fn u64_of(&self, keys: &[&str]) -> Option<u64> {
        self.first(keys).and_then(value_as_u64)
    }

    fn str_of(&self, keys: &[&str]) -> Option<String> {
        self.first(keys).and_then(|v| v.as_str().map(ToString::to_string))
    }

    /// Seconds, converting from whichever unit the key carries.
    fn seconds(&self, base: &str) -> u64 {
        let ns_key = format!("{base}_ns");
        if let Some(ns) = self.u64_of(&[ns_key.as_str()]) {
            return ns / 1_000_000_000;
        }
        let ms_key = format!("{base}_ms");
        if let Some(ms) = self.u64_of(&[ms_key.as_str()]) {
            return ms / 1_000;
        }
        self.u64_of(&[base]).unwrap_or(0)
    }
}

fn value_as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn require_ip(value: Option<String>, field: &str, index: usize) -> Result<String, IngestError> {
    let raw = value.ok_or_else(|| IngestError::InvalidRecord {
        index,
        reason: format!("missing {field}"),
    })?;
    let ip: IpAddr = raw.parse().map_err(|_| IngestError::InvalidRecord {
        index,
        reason: format!("{field} '{raw}' is not an IP address"),
    })?;
    Ok(ip.to_string())
}

fn canonical_protocol(v: Option<&Value>) -> String {
    match v {
        Some(Value::Number(n)) => n.as_u64().map_or_else(
            || n.to_string(),
            |num| protocol_name(num).map_or_else(|| num.to_string(), ToString::to_string),
        ),
        Some(Value::String(s)) => match s.parse::<u64>() {
            Ok(num) => protocol_name(num).map_or_else(|| num.to_string(), ToString::to_string),
            Err(_) => s.to_ascii_lowercase(),
        },
        _ => String::new(),
    }
}

/// Canonicalize one collector-native record.
pub fn canonicalize(raw: &Value, index: usize) -> Result<CanonicalFlow, IngestError> {
    let obj = raw.as_object().ok_or_else(|| IngestError::InvalidRecord {
        index,
        reason: "record is not an object".to_string(),
    })?;
    let r = RawRecord::new(obj);

    let narrow_u16 = |keys: &[&str]| r.u64_of(keys).and_then(|n| u16::try_from(n).ok()).unwrap_or(0);
    let narrow_u32 = |keys: &[&str]| r.u64_of(keys).and_then(|n| u32::try_from(n).ok());

    Ok(CanonicalFlow {
        time_received: r.seconds("time_received"),
        time_flow_start: r.seconds("time_flow_start"),
        time_flow_end: r.seconds("time_flow_end"),
        src_addr: require_ip(r.str_of(&["src_addr", "src_ip", "source_ipv4_address"]), "src_addr", index)?,
        dst_addr: require_ip(
            r.str_of(&["dst_addr", "dst_ip", "destination_ipv4_address"]),
            "dst_addr",
            index,
        )?,
        src_port: narrow_u16(&["src_port", "source_transport_port"]),
        dst_port: narrow_u16(&["dst_port", "destination_transport_port"]),
        protocol: canonical_protocol(r.first(&["proto", "protocol", "protocol_identifier"])),
        bytes: r.u64_of(&["bytes", "octet_delta_count", "in_bytes"]).unwrap_or(0),
        packets: r.u64_of(&["packets", "packet_delta_count", "in_pkts"]).unwrap_or(0),
        sampler_address: r.str_of(&["sampler_address", "exporter_address"]),
        sampling_rate: r.u64_of(&["sampling_rate"]).filter(|n| *n > 0),
        in_if: narrow_u32(&["in_if", "ingress_interface"]),
        out_if: narrow_u32(&["out_if", "egress_interface"]),
        tcp_flags: r.u64_of(&["tcp_flags", "tcp_control_bits"]).and_then(|n| u8::try_from(n).ok()),
        annotations: BTreeMap::new(),
    })
}

/// Parse an already-canonical record, checking its addresses.
pub fn parse_canonical(raw: &Value, index: usize) -> Result<CanonicalFlow, IngestError> {
    let mut flow: CanonicalFlow =
        serde_json::from_value(raw.clone()).map_err(|e| IngestError::InvalidRecord {
            index,
            reason: e.to_string(),
        })?;
    flow.src_addr = require_ip(Some(flow.src_addr), "src_addr", index)?;
    flow.dst_addr = require_ip(Some(flow.dst_addr), "dst_addr", index)?;
    flow.protocol = flow.protocol.to_ascii_lowercase();
    Ok(flow)
}

/// Envelope checks done before touching any record.
pub fn validate_envelope(request: &IngestRequest, max_records: usize) -> Result<(), IngestError> {
    validate_identifier(&request.collector_id)
        .map_err(|e| IngestError::Schema(format!("collector_id: {e}")))?;
    if request.records.is_empty() {
        return Err(IngestError::Schema("records must not be empty".to_string()));
    }
    if request.records.len() > max_records {
        return Err(IngestError::TooManyRecords {
            count: request.records.len(),
            limit: max_records,
        });
    }
    Ok(())
}

/// Convert every record per the request format. Bad records are
/// returned separately and do not fail the batch.
pub fn parse_records(request: &IngestRequest) -> (Vec<CanonicalFlow>, Vec<IngestError>) {
    let mut flows = Vec::with_capacity(request.records.len());
    let mut rejected = Vec::new();
    for (index, raw) in request.records.iter().enumerate() {
        let parsed = match request.format {
            RecordFormat::Canonical => parse_canonical(raw, index),
            RecordFormat::Raw => canonicalize(raw, index),
        };
        match parsed {
            Ok(flow) => flows.push(flow),
            Err(e) => rejected.push(e),
        }
    }
    (flows, rejected)
}
