//! Source registry configuration.

use std::collections::HashSet;
use std::time::Duration;

use domain::source::entity::Source;
use serde::{Deserialize, Serialize};

use super::common::{
    ConfigError, MAX_SEED_SOURCES, check_limit, require_nonzero, validate_cidr,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// A source unseen for longer than this is `degraded`.
    #[serde(default = "default_degraded_after_secs")]
    pub degraded_after_secs: u64,

    /// A source unseen for longer than this is `stale`.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Path to the redb database holding sources, dead letters and the
    /// change log. Empty keeps everything in memory.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Sources inserted at startup when absent from storage.
    #[serde(default)]
    pub sources: Vec<Source>,
}

fn default_refresh_interval_secs() -> u64 {
    30
}
fn default_degraded_after_secs() -> u64 {
    60
}
fn default_stale_after_secs() -> u64 {
    300
}
fn default_storage_path() -> String {
    "data/flowgate.redb".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            degraded_after_secs: default_degraded_after_secs(),
            stale_after_secs: default_stale_after_secs(),
            storage_path: default_storage_path(),
            sources: Vec::new(),
        }
    }
}

impl RegistryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn degraded_after(&self) -> Duration {
        Duration::from_secs(self.degraded_after_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero(
            "registry.refresh_interval_secs",
            self.refresh_interval_secs,
        )?;
        require_nonzero("registry.degraded_after_secs", self.degraded_after_secs)?;
        if self.stale_after_secs <= self.degraded_after_secs {
            return Err(ConfigError::Validation {
                field: "registry.stale_after_secs".to_string(),
                message: "must be greater than degraded_after_secs".to_string(),
            });
        }

        check_limit("registry.sources", self.sources.len(), MAX_SEED_SOURCES)?;
        let mut seen = HashSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let prefix = format!("registry.sources[{idx}]");
            source.validate(false).map_err(|e| ConfigError::Validation {
                field: prefix.clone(),
                message: e.to_string(),
            })?;
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::Validation {
                    field: format!("{prefix}.id"),
                    message: format!("duplicate source id '{}'", source.id),
                });
            }
            for entry in &source.allowed_ips {
                validate_cidr(entry)?;
            }
        }
        Ok(())
    }
}
