//! Gateway configuration: structs, parsing, env overlay and validation.
//!
//! - `common`: shared helpers and `ConfigError`
//! - `env`: environment variable overlay
//! - `server`, `admission`, `registry`, `allowlist`, `audit`, `mapper`,
//!   `sinks`, `enrichment`, `auth`: per-section configs

mod admission;
mod allowlist;
mod audit;
mod auth;
mod common;
mod enrichment;
mod env;
mod mapper;
mod registry;
mod server;
mod sinks;

pub use admission::AdmissionConfig;
pub use allowlist::AllowlistConfig;
pub use audit::AuditConfig;
pub use auth::{ApiKeyConfig, AuthConfig};
pub use common::{ConfigError, validate_cidr};
pub use enrichment::{CidrTagConfig, EnrichmentConfig};
pub use mapper::MapperConfig;
pub use registry::RegistryConfig;
pub use server::ServerConfig;
pub use sinks::{HttpSinkConfig, LogSinkConfig, SinkConfig};

use std::path::Path;

use serde::{Deserialize, Serialize};

use common::warn_if_world_readable;

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub allowlist: AllowlistConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub mapper: MapperConfig,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

impl GatewayConfig {
    /// Load config from a YAML file, overlay the process environment,
    /// then validate.
    ///
    /// On Unix, logs a warning if the file is world-readable since it may
    /// hold API keys and sink credentials.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        warn_if_world_readable(path, "config file");
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_with_env(&content, |name| std::env::var(name).ok())
    }

    /// Defaults plus the process environment, for running without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a YAML string without any environment overlay.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_with_env(yaml, |_| None)
    }

    pub fn from_yaml_with_env<F>(yaml: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(yaml)?
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Return a copy of the config with secrets masked.
    /// Masks: API keys, the mapper's bearer token, HTTP sink headers.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut sanitized = self.clone();
        for key in &mut sanitized.auth.api_keys {
            if key.key.is_some() {
                key.key = Some("***".to_string());
            }
        }
        if sanitized.mapper.api_key.is_some() {
            sanitized.mapper.api_key = Some("***".to_string());
        }
        for sink in &mut sanitized.sinks {
            if let SinkConfig::Http(http) = sink {
                for value in http.headers.values_mut() {
                    *value = "***".to_string();
                }
            }
        }
        sanitized
    }

    /// Validate the config after deserialization and env overlay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.registry.validate()?;
        self.allowlist.validate()?;
        self.audit.validate()?;
        self.mapper.validate()?;
        sinks::validate_sinks(&self.sinks)?;
        self.enrichment.validate()?;
        self.auth.validate()?;
        Ok(())
    }
}

// ── Logging ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}

// ── Log level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "invalid log level '{s}': expected error|warn|info|debug|trace"
            )),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(format!("invalid log format '{s}': expected json|text")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use domain::auth::rbac::Role;
    use domain::ingest::entity::RecordFormat;
    use domain::source::entity::SourceStatus;

    use super::*;
    use crate::constants::{DEFAULT_HTTP_PORT, DEFAULT_UDP_PORT};

    fn assert_validation_field(result: Result<GatewayConfig, ConfigError>, expected: &str) {
        match result {
            Err(ConfigError::Validation { field, .. }) => assert_eq!(field, expected),
            Err(other) => panic!("expected validation error on {expected}, got {other}"),
            Ok(_) => panic!("expected validation error on {expected}"),
        }
    }

    // ── Minimal config loading ────────────────────────────────────

    #[test]
    fn empty_yaml_uses_defaults() {
        let config = GatewayConfig::from_yaml("").unwrap();
        assert_eq!(config.server.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.server.udp_port, DEFAULT_UDP_PORT);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.admission.http_enabled);
        assert!(config.admission.log_only);
        assert!(config.admission.fail_open);
        assert!(config.admission.strict_cidr);
        assert_eq!(config.audit.capacity, 1000);
        assert_eq!(
            config.audit.exclude_paths,
            vec!["/healthz", "/metrics", "/admin/requests", "/logs/stream"]
        );
        assert_eq!(config.mapper.max_payload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.mapper.input_format, RecordFormat::Raw);
        assert!(config.sinks.is_empty());
        assert!(!config.auth.enabled);
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
server:
  bind_address: 0.0.0.0
  http_port: 9000
  udp_port: 4739
  udp_forward_to: "127.0.0.1:9995"
logging:
  level: debug
  format: text
admission:
  http_enabled: true
  log_only: false
registry:
  refresh_interval_secs: 10
  storage_path: ""
  sources:
    - id: edge-1
      tenant_id: acme
      type: netflow
      allowed_ips: ["10.0.0.0/8", "2001:db8::/32"]
      max_eps: 1000
    - id: edge-2
      tenant_id: acme
      type: ipfix
      status: disabled
allowlist:
  table: gw
  sync_on_start: true
audit:
  capacity: 50
  sample_rate: 0.5
sinks:
  - type: http
    name: archive
    url: https://archive.example/flows
    headers:
      Authorization: Bearer abc
  - type: log
enrichment:
  cidr_tags:
    - cidr: 10.0.0.0/8
      tags:
        zone: internal
auth:
  enabled: true
  api_keys:
    - name: ops
      key: sk-ops
      role: operator
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_port, 9000);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.admission.http_enabled);
        assert_eq!(config.registry.sources.len(), 2);
        assert_eq!(config.registry.sources[1].status, SourceStatus::Disabled);
        assert!(config.registry.sources[0].block_on_exceed);
        assert_eq!(config.allowlist.table, "gw");
        assert_eq!(config.sinks.len(), 2);
        assert_eq!(config.sinks[1].name(), "log");
        assert_eq!(config.enrichment.cidr_tags[0].tags["zone"], "internal");
        assert_eq!(config.auth.api_keys[0].role, Role::Operator);
        assert!(!config.admission.flags().log_only);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let yaml = "server:\n  http_prot: 9000\n";
        assert!(matches!(
            GatewayConfig::from_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  http_port: 8181").unwrap();
        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.server.http_port, 8181);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = GatewayConfig::load(Path::new("/nonexistent/flowgate.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn env_overlay_wins_over_yaml() {
        let yaml = "admission:\n  log_only: true\n";
        let config = GatewayConfig::from_yaml_with_env(yaml, |name| {
            (name == "ADMISSION_LOG_ONLY").then(|| "false".to_string())
        })
        .unwrap();
        assert!(!config.admission.log_only);
    }

    #[test]
    fn env_overlay_is_validated() {
        let result = GatewayConfig::from_yaml_with_env("", |name| {
            (name == "AUDIT_SAMPLE_RATE").then(|| "1.5".to_string())
        });
        assert_validation_field(result, "audit.sample_rate");
    }

    // ── Validation ─────────────────────────────────────────────────

    #[test]
    fn zero_port_rejected() {
        assert_validation_field(
            GatewayConfig::from_yaml("server:\n  http_port: 0\n"),
            "server.http_port",
        );
        assert_validation_field(
            GatewayConfig::from_yaml("server:\n  udp_port: 0\n"),
            "server.udp_port",
        );
    }

    #[test]
    fn zero_capacity_rejected() {
        assert_validation_field(
            GatewayConfig::from_yaml("audit:\n  capacity: 0\n"),
            "audit.capacity",
        );
        assert_validation_field(
            GatewayConfig::from_yaml("server:\n  fifo_capacity: 0\n"),
            "server.fifo_capacity",
        );
    }

    #[test]
    fn sample_rate_out_of_range_rejected() {
        assert_validation_field(
            GatewayConfig::from_yaml("audit:\n  sample_rate: -0.1\n"),
            "audit.sample_rate",
        );
    }

    #[test]
    fn malformed_seed_cidr_rejected() {
        let yaml = r#"
registry:
  sources:
    - id: s1
      tenant_id: t
      type: netflow
      allowed_ips: ["10.0.0.0/8", "not-a-cidr"]
"#;
        assert!(matches!(
            GatewayConfig::from_yaml(yaml),
            Err(ConfigError::InvalidCidr { ref value, .. }) if value == "not-a-cidr"
        ));
    }

    #[test]
    fn duplicate_seed_source_rejected() {
        let yaml = r#"
registry:
  sources:
    - { id: s1, tenant_id: t, type: netflow }
    - { id: s1, tenant_id: t, type: netflow }
"#;
        assert_validation_field(GatewayConfig::from_yaml(yaml), "registry.sources[1].id");
    }

    #[test]
    fn malformed_enrichment_cidr_rejected() {
        let yaml = r#"
enrichment:
  cidr_tags:
    - cidr: 300.0.0.0/8
      tags: { zone: x }
"#;
        assert!(matches!(
            GatewayConfig::from_yaml(yaml),
            Err(ConfigError::InvalidCidr { .. })
        ));
    }

    #[test]
    fn stale_threshold_must_exceed_degraded() {
        let yaml = "registry:\n  degraded_after_secs: 120\n  stale_after_secs: 60\n";
        assert_validation_field(GatewayConfig::from_yaml(yaml), "registry.stale_after_secs");
    }

    #[test]
    fn gzip_threshold_above_payload_cap_rejected() {
        let yaml = "mapper:\n  max_payload_bytes: 1000\n  gzip_threshold_bytes: 2000\n";
        assert_validation_field(
            GatewayConfig::from_yaml(yaml),
            "mapper.gzip_threshold_bytes",
        );
    }

    #[test]
    fn duplicate_sink_names_rejected() {
        let yaml = "sinks:\n  - type: log\n  - type: log\n";
        assert_validation_field(GatewayConfig::from_yaml(yaml), "sinks[1].name");
    }

    #[test]
    fn http_sink_needs_http_url() {
        let yaml = "sinks:\n  - type: http\n    name: a\n    url: ftp://x\n";
        assert_validation_field(GatewayConfig::from_yaml(yaml), "sinks[0].url");
    }

    #[test]
    fn nft_names_are_restricted() {
        let yaml = "allowlist:\n  table: \"gw; flush ruleset\"\n";
        assert_validation_field(GatewayConfig::from_yaml(yaml), "allowlist.table");
    }

    // ── Auth ───────────────────────────────────────────────────────

    #[test]
    fn auth_enabled_without_keys_rejected() {
        assert_validation_field(
            GatewayConfig::from_yaml("auth:\n  enabled: true\n"),
            "auth.api_keys",
        );
    }

    #[test]
    fn api_key_needs_exactly_one_secret() {
        let yaml = r#"
auth:
  api_keys:
    - name: a
      key: k
      key_sha256: "0000000000000000000000000000000000000000000000000000000000000000"
"#;
        assert_validation_field(GatewayConfig::from_yaml(yaml), "auth.api_keys[0].key");
    }

    #[test]
    fn api_key_digest_must_be_hex() {
        let yaml = "auth:\n  api_keys:\n    - name: a\n      key_sha256: abc\n";
        assert_validation_field(
            GatewayConfig::from_yaml(yaml),
            "auth.api_keys[0].key_sha256",
        );
    }

    #[test]
    fn unknown_role_rejected() {
        let yaml = "auth:\n  api_keys:\n    - name: a\n      key: k\n      role: root\n";
        assert!(matches!(
            GatewayConfig::from_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    // ── Sanitize ───────────────────────────────────────────────────

    #[test]
    fn sanitized_masks_secrets() {
        let yaml = r#"
mapper:
  api_key: secret-token
sinks:
  - type: http
    name: archive
    url: http://x/flows
    headers: { Authorization: "Bearer abc" }
auth:
  api_keys:
    - { name: ops, key: sk-ops, role: admin }
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap().sanitized();
        assert_eq!(config.auth.api_keys[0].key.as_deref(), Some("***"));
        assert_eq!(config.mapper.api_key.as_deref(), Some("***"));
        let SinkConfig::Http(ref http) = config.sinks[0] else {
            panic!("expected http sink");
        };
        assert_eq!(http.headers["Authorization"], "***");
    }

    // ── Log enums ──────────────────────────────────────────────────

    #[test]
    fn log_level_round_trip() {
        for level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            assert_eq!(level.as_str().parse::<LogLevel>().unwrap(), level);
        }
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn log_format_parse() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!(LogFormat::Json.to_string(), "json");
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
