//! Ingest mapper configuration (`flowgate map`).

use std::time::Duration;

use domain::common::entity::validate_identifier;
use domain::ingest::backoff::BackoffPolicy;
use domain::ingest::batcher::BatchPolicy;
use domain::ingest::entity::RecordFormat;
use domain::ingest::payload::PayloadLimits;
use serde::{Deserialize, Serialize};

use super::common::{ConfigError, require_nonzero};
use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_GZIP_THRESHOLD_BYTES,
    DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_MAX_RECORDS_PER_BATCH, DEFAULT_MAX_RETRIES,
    DEFAULT_MIN_SPLIT_SIZE,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapperConfig {
    /// Full URL of the gateway's `/ingest` endpoint.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_collector_id")]
    pub collector_id: String,

    /// Bearer token sent to the gateway.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Shape of the records read from the collector.
    #[serde(default = "default_input_format")]
    pub input_format: RecordFormat,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_max_records_per_batch")]
    pub max_records_per_batch: usize,

    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    #[serde(default = "default_gzip_threshold_bytes")]
    pub gzip_threshold_bytes: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Upper bound on one delivery attempt.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Batches at or below this size are dead-lettered instead of split.
    #[serde(default = "default_min_split_size")]
    pub min_split_size: usize,
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8080/ingest".to_string()
}
fn default_collector_id() -> String {
    "flowgate-mapper".to_string()
}
fn default_input_format() -> RecordFormat {
    RecordFormat::Raw
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}
fn default_max_records_per_batch() -> usize {
    DEFAULT_MAX_RECORDS_PER_BATCH
}
fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}
fn default_gzip_threshold_bytes() -> usize {
    DEFAULT_GZIP_THRESHOLD_BYTES
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_min_split_size() -> usize {
    DEFAULT_MIN_SPLIT_SIZE
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            collector_id: default_collector_id(),
            api_key: None,
            input_format: default_input_format(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            max_records_per_batch: default_max_records_per_batch(),
            max_payload_bytes: default_max_payload_bytes(),
            gzip_threshold_bytes: default_gzip_threshold_bytes(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            min_split_size: default_min_split_size(),
        }
    }
}

impl MapperConfig {
    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            batch_size: self.batch_size,
            max_records: self.max_records_per_batch,
            max_bytes: self.max_payload_bytes,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }

    pub fn payload_limits(&self) -> PayloadLimits {
        PayloadLimits {
            gzip_threshold: self.gzip_threshold_bytes,
            max_payload: self.max_payload_bytes,
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            attempt_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !self.gateway_url.starts_with("http://") && !self.gateway_url.starts_with("https://")
        {
            return Err(ConfigError::Validation {
                field: "mapper.gateway_url".to_string(),
                message: format!("'{}' is not an http(s) URL", self.gateway_url),
            });
        }
        if let Err(message) = validate_identifier(&self.collector_id) {
            return Err(ConfigError::Validation {
                field: "mapper.collector_id".to_string(),
                message: message.to_string(),
            });
        }
        require_nonzero("mapper.batch_size", self.batch_size as u64)?;
        require_nonzero("mapper.flush_interval_ms", self.flush_interval_ms)?;
        require_nonzero(
            "mapper.max_records_per_batch",
            self.max_records_per_batch as u64,
        )?;
        require_nonzero("mapper.max_payload_bytes", self.max_payload_bytes as u64)?;
        require_nonzero("mapper.request_timeout_ms", self.request_timeout_ms)?;
        require_nonzero("mapper.min_split_size", self.min_split_size as u64)?;
        if self.gzip_threshold_bytes > self.max_payload_bytes {
            return Err(ConfigError::Validation {
                field: "mapper.gzip_threshold_bytes".to_string(),
                message: "must not exceed max_payload_bytes".to_string(),
            });
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Validation {
                field: "mapper.initial_backoff_ms".to_string(),
                message: "must not exceed max_backoff_ms".to_string(),
            });
        }
        Ok(())
    }
}
