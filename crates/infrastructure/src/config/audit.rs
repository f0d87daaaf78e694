//! Request audit trail configuration.

use domain::audit::sampler::AuditSampler;
use serde::{Deserialize, Serialize};

use super::common::{ConfigError, require_nonzero};
use crate::constants::{
    DEFAULT_AUDIT_CAPACITY, DEFAULT_AUDIT_EXCLUDE_PATHS, DEFAULT_SUMMARY_WINDOW_SECS,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Ring buffer size. Oldest records are evicted when full.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Fraction of 2xx requests kept. Errors are always kept.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Path prefixes never audited.
    #[serde(default = "default_exclude_paths")]
    pub exclude_paths: Vec<String>,

    /// Window used by `/admin/requests/summary` and the JSON metrics view.
    #[serde(default = "default_summary_window_secs")]
    pub summary_window_secs: u64,
}

fn default_capacity() -> usize {
    DEFAULT_AUDIT_CAPACITY
}
fn default_sample_rate() -> f64 {
    1.0
}
fn default_exclude_paths() -> Vec<String> {
    DEFAULT_AUDIT_EXCLUDE_PATHS
        .iter()
        .map(ToString::to_string)
        .collect()
}
fn default_summary_window_secs() -> u64 {
    DEFAULT_SUMMARY_WINDOW_SECS
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            sample_rate: default_sample_rate(),
            exclude_paths: default_exclude_paths(),
            summary_window_secs: default_summary_window_secs(),
        }
    }
}

impl AuditConfig {
    pub fn sampler(&self) -> AuditSampler {
        AuditSampler::new(self.sample_rate, self.exclude_paths.clone())
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("audit.capacity", self.capacity as u64)?;
        require_nonzero("audit.summary_window_secs", self.summary_window_secs)?;
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(ConfigError::Validation {
                field: "audit.sample_rate".to_string(),
                message: format!("{} is outside [0, 1]", self.sample_rate),
            });
        }
        Ok(())
    }
}
