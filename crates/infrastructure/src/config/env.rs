//! Environment variable overlay applied on top of the YAML file.

use std::str::FromStr;

use super::GatewayConfig;
use super::common::ConfigError;

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn parse_num<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: raw.to_string(),
    })
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl GatewayConfig {
    /// Overlay recognised environment variables. `lookup` is
    /// `std::env::var` in production and a map in tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str, target: &mut bool| -> Result<(), ConfigError> {
            if let Some(raw) = lookup(name) {
                *target = parse_bool(name, &raw)?;
            }
            Ok(())
        };
        flag("ADMISSION_HTTP_ENABLED", &mut self.admission.http_enabled)?;
        flag("ADMISSION_UDP_ENABLED", &mut self.admission.udp_enabled)?;
        flag("ADMISSION_LOG_ONLY", &mut self.admission.log_only)?;
        flag("ADMISSION_FAIL_OPEN", &mut self.admission.fail_open)?;
        flag("ADMISSION_STRICT_CIDR", &mut self.admission.strict_cidr)?;

        macro_rules! number {
            ($name:literal, $target:expr) => {
                if let Some(raw) = lookup($name) {
                    $target = parse_num($name, &raw)?;
                }
            };
        }
        number!("RATE_LIMIT_DEFAULT_MAX_EPS", self.admission.default_max_eps);
        number!("AUDIT_CAPACITY", self.audit.capacity);
        number!("AUDIT_SAMPLE_RATE", self.audit.sample_rate);
        number!("MAPPER_BATCH_SIZE", self.mapper.batch_size);
        number!("MAPPER_FLUSH_INTERVAL_MS", self.mapper.flush_interval_ms);
        number!(
            "MAPPER_MAX_RECORDS_PER_BATCH",
            self.mapper.max_records_per_batch
        );
        number!("MAPPER_MAX_PAYLOAD_BYTES", self.mapper.max_payload_bytes);
        number!(
            "MAPPER_GZIP_THRESHOLD_BYTES",
            self.mapper.gzip_threshold_bytes
        );
        number!("MAPPER_MAX_RETRIES", self.mapper.max_retries);
        number!("MAPPER_MIN_SPLIT_SIZE", self.mapper.min_split_size);

        if let Some(raw) = lookup("AUDIT_EXCLUDE_PATHS") {
            self.audit.exclude_paths = parse_list(&raw);
        }
        if let Some(raw) = lookup("FLOWGATE_LOG_LEVEL") {
            self.logging.level = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "FLOWGATE_LOG_LEVEL".to_string(),
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("FLOWGATE_LOG_FORMAT") {
            self.logging.format = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "FLOWGATE_LOG_FORMAT".to_string(),
                value: raw.clone(),
            })?;
        }
        Ok(())
    }
}
