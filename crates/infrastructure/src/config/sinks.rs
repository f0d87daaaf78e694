//! Downstream sink configuration.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use domain::ingest::backoff::BackoffPolicy;
use serde::{Deserialize, Serialize};

use super::common::{ConfigError, MAX_SINKS, check_limit, require_nonzero};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// POST flows as a JSON array.
    Http(HttpSinkConfig),
    /// Emit each flow as a structured log line.
    Log(LogSinkConfig),
}

impl SinkConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Http(c) => &c.name,
            Self::Log(c) => &c.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSinkConfig {
    pub name: String,
    pub url: String,

    /// Extra request headers, e.g. `Authorization`.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// How long the circuit stays open before a probe.
    #[serde(default = "default_open_secs")]
    pub open_secs: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_initial_backoff_ms() -> u64 {
    200
}
fn default_max_backoff_ms() -> u64 {
    2_000
}
fn default_failure_threshold() -> usize {
    5
}
fn default_open_secs() -> u64 {
    30
}

impl HttpSinkConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            attempt_timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSinkConfig {
    #[serde(default = "default_log_sink_name")]
    pub name: String,
}

fn default_log_sink_name() -> String {
    "log".to_string()
}

pub(super) fn validate_sinks(sinks: &[SinkConfig]) -> Result<(), ConfigError> {
    check_limit("sinks", sinks.len(), MAX_SINKS)?;
    let mut names = HashSet::new();
    for (idx, sink) in sinks.iter().enumerate() {
        let prefix = format!("sinks[{idx}]");
        if sink.name().trim().is_empty() {
            return Err(ConfigError::Validation {
                field: format!("{prefix}.name"),
                message: "must not be empty".to_string(),
            });
        }
        if !names.insert(sink.name()) {
            return Err(ConfigError::Validation {
                field: format!("{prefix}.name"),
                message: format!("duplicate sink name '{}'", sink.name()),
            });
        }
        if let SinkConfig::Http(http) = sink {
            if !http.url.starts_with("http://") && !http.url.starts_with("https://") {
                return Err(ConfigError::Validation {
                    field: format!("{prefix}.url"),
                    message: format!("'{}' is not an http(s) URL", http.url),
                });
            }
            require_nonzero(&format!("{prefix}.timeout_ms"), http.timeout_ms)?;
            require_nonzero(
                &format!("{prefix}.failure_threshold"),
                http.failure_threshold as u64,
            )?;
        }
    }
    Ok(())
}
