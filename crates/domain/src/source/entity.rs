use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::entity::validate_identifier;
use crate::common::network::{IpNetwork, parse_cidr};

use super::error::SourceError;

/// Operator-controlled security gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    #[default]
    Enabled,
    Disabled,
}

impl SourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown status '{other}': expected enabled|disabled")),
        }
    }
}

/// Activity-derived health, independent of [`SourceStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    #[default]
    Stale,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Stale => "stale",
        }
    }

    /// Derive health from the age of the last observed traffic.
    ///
    /// A source never seen is stale.
    pub fn derive(
        last_seen_ms: Option<u64>,
        now_ms: u64,
        degraded_after_ms: u64,
        stale_after_ms: u64,
    ) -> Self {
        let Some(seen) = last_seen_ms else {
            return Self::Stale;
        };
        let age = now_ms.saturating_sub(seen);
        if age < degraded_after_ms {
            Self::Healthy
        } else if age < stale_after_ms {
            Self::Degraded
        } else {
            Self::Stale
        }
    }
}

/// A registered traffic origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub status: SourceStatus,
    /// Filled in by the registry on read; ignored on write.
    #[serde(default)]
    pub health_status: HealthStatus,
    /// CIDR strings, IPv4 and IPv6 mixed. Order is preserved.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    /// Records per second. `0` means unlimited.
    #[serde(default)]
    pub max_eps: u64,
    /// When `false`, overage is logged but admitted.
    #[serde(default = "default_block_on_exceed")]
    pub block_on_exceed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at_ms: u64,
    #[serde(default)]
    pub updated_at_ms: u64,
}

fn default_block_on_exceed() -> bool {
    true
}

impl Source {
    /// Validate identity fields and, when `strict`, every `allowed_ips`
    /// entry. Non-strict validation leaves malformed CIDRs for the
    /// admission engine to skip.
    pub fn validate(&self, strict: bool) -> Result<(), SourceError> {
        validate_identifier(&self.id).map_err(|reason| SourceError::InvalidId(reason.to_string()))?;

        if self.tenant_id.trim().is_empty() {
            return Err(SourceError::InvalidField {
                field: "tenant_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.source_type.trim().is_empty() {
            return Err(SourceError::InvalidField {
                field: "type".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if strict {
            for entry in &self.allowed_ips {
                parse_cidr(entry)?;
            }
        }
        Ok(())
    }

    /// Split `allowed_ips` into parsed networks and the raw entries that
    /// failed to parse.
    pub fn parse_allowed_ips(&self) -> (Vec<IpNetwork>, Vec<String>) {
        let mut networks = Vec::with_capacity(self.allowed_ips.len());
        let mut malformed = Vec::new();
        for entry in &self.allowed_ips {
            match parse_cidr(entry) {
                Ok(net) => networks.push(net),
                Err(_) => malformed.push(entry.clone()),
            }
        }
        (networks, malformed)
    }

    pub fn is_enabled(&self) -> bool {
        self.status == SourceStatus::Enabled
    }
}

#[cfg(test)]
pub(crate) fn make_source(id: &str, allowed_ips: &[&str]) -> Source {
    Source {
        id: id.to_string(),
        tenant_id: "tenant-a".to_string(),
        source_type: "netflow".to_string(),
        status: SourceStatus::Enabled,
        health_status: HealthStatus::Stale,
        allowed_ips: allowed_ips.iter().map(ToString::to_string).collect(),
        max_eps: 0,
        block_on_exceed: true,
        description: None,
        created_at_ms: 0,
        updated_at_ms: 0,
    }
}
