//! Kernel allowlist (nftables) configuration.

use serde::{Deserialize, Serialize};

use super::common::{ConfigError, default_true};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowlistConfig {
    /// When false the packet filter adapter reports itself unavailable.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_nft_binary")]
    pub nft_binary: String,

    #[serde(default = "default_family")]
    pub family: String,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_set_v4")]
    pub set_v4: String,

    #[serde(default = "default_set_v6")]
    pub set_v6: String,

    /// Run one sync right after startup.
    #[serde(default)]
    pub sync_on_start: bool,
}

fn default_nft_binary() -> String {
    "nft".to_string()
}
fn default_family() -> String {
    "inet".to_string()
}
fn default_table() -> String {
    "flowgate".to_string()
}
fn default_set_v4() -> String {
    "allowed_v4".to_string()
}
fn default_set_v6() -> String {
    "allowed_v6".to_string()
}

impl Default for AllowlistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            nft_binary: default_nft_binary(),
            family: default_family(),
            table: default_table(),
            set_v4: default_set_v4(),
            set_v6: default_set_v6(),
            sync_on_start: false,
        }
    }
}

impl AllowlistConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !["inet", "ip", "ip6", "bridge", "netdev"].contains(&self.family.as_str()) {
            return Err(ConfigError::Validation {
                field: "allowlist.family".to_string(),
                message: format!("unknown nftables family '{}'", self.family),
            });
        }
        // Names end up as command arguments.
        for (field, value) in [
            ("allowlist.table", &self.table),
            ("allowlist.set_v4", &self.set_v4),
            ("allowlist.set_v6", &self.set_v6),
        ] {
            if value.is_empty()
                || !value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(ConfigError::Validation {
                    field: field.to_string(),
                    message: format!("'{value}' must be non-empty [A-Za-z0-9_-]"),
                });
            }
        }
        if self.set_v4 == self.set_v6 {
            return Err(ConfigError::Validation {
                field: "allowlist.set_v6".to_string(),
                message: "must differ from set_v4".to_string(),
            });
        }
        Ok(())
    }
}
