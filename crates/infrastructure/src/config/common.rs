//! Shared helpers and error types used across all config modules.

use std::path::Path;

use domain::common::network::{IpNetwork, parse_cidr};
use tracing::warn;

// ── Limits ─────────────────────────────────────────────────────────

/// Maximum seed sources loaded from the config file.
pub(super) const MAX_SEED_SOURCES: usize = 10_000;
/// Maximum static enrichment entries.
pub(super) const MAX_ENRICHMENT_ENTRIES: usize = 50_000;
/// Maximum configured sinks.
pub(super) const MAX_SINKS: usize = 32;
/// Maximum API keys.
pub(super) const MAX_API_KEYS: usize = 1_000;

// ── Config errors ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid CIDR notation '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("invalid value '{value}' for environment variable {name}")]
    InvalidEnv { name: String, value: String },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

// ── Shared serde defaults ──────────────────────────────────────────

pub(super) fn default_true() -> bool {
    true
}

// ── Validation helpers ─────────────────────────────────────────────

/// Parse a CIDR, mapping failures to `ConfigError::InvalidCidr`.
pub fn validate_cidr(value: &str) -> Result<IpNetwork, ConfigError> {
    parse_cidr(value).map_err(|e| ConfigError::InvalidCidr {
        value: value.to_string(),
        reason: e.reason,
    })
}

pub(super) fn require_nonzero(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation {
            field: field.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// Enforce a maximum count on a config collection.
pub(super) fn check_limit(field: &str, count: usize, max: usize) -> Result<(), ConfigError> {
    if count > max {
        return Err(ConfigError::Validation {
            field: field.to_string(),
            message: format!("count {count} exceeds maximum {max}"),
        });
    }
    Ok(())
}

/// Log a warning if a file is world-readable (Unix only). Config may
/// hold API keys and sink auth headers.
#[cfg(unix)]
pub(super) fn warn_if_world_readable(path: &Path, label: &str) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o004 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{mode:04o}"),
                "{label} is world-readable, consider chmod 640 or stricter",
            );
        }
    }
}

#[cfg(not(unix))]
pub(super) fn warn_if_world_readable(_path: &Path, _label: &str) {}
