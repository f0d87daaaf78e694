//! API authentication configuration.

use std::collections::HashSet;

use domain::auth::rbac::Role;
use serde::{Deserialize, Serialize};

use super::common::{ConfigError, MAX_API_KEYS, check_limit};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// When false every request runs as an anonymous admin.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

/// One static key. Give either the plaintext `key` or its hex SHA-256
/// digest in `key_sha256`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeyConfig {
    pub name: String,

    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub key_sha256: Option<String>,

    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Viewer
}

impl AuthConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        check_limit("auth.api_keys", self.api_keys.len(), MAX_API_KEYS)?;
        if self.enabled && self.api_keys.is_empty() {
            return Err(ConfigError::Validation {
                field: "auth.api_keys".to_string(),
                message: "auth is enabled but no API keys are configured".to_string(),
            });
        }

        let mut names = HashSet::new();
        for (idx, key_cfg) in self.api_keys.iter().enumerate() {
            let prefix = format!("auth.api_keys[{idx}]");
            if key_cfg.name.is_empty() {
                return Err(ConfigError::Validation {
                    field: format!("{prefix}.name"),
                    message: "API key name must not be empty".to_string(),
                });
            }
            if !names.insert(key_cfg.name.as_str()) {
                return Err(ConfigError::Validation {
                    field: format!("{prefix}.name"),
                    message: format!("duplicate API key name '{}'", key_cfg.name),
                });
            }
            match (&key_cfg.key, &key_cfg.key_sha256) {
                (Some(key), None) if !key.is_empty() => {}
                (None, Some(digest))
                    if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) => {}
                (None, Some(_)) => {
                    return Err(ConfigError::Validation {
                        field: format!("{prefix}.key_sha256"),
                        message: "must be 64 hex characters".to_string(),
                    });
                }
                _ => {
                    return Err(ConfigError::Validation {
                        field: format!("{prefix}.key"),
                        message: "exactly one of key or key_sha256 must be set".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
