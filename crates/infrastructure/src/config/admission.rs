//! Admission control configuration.

use domain::admission::flags::FeatureFlags;
use serde::{Deserialize, Serialize};

use super::common::default_true;

/// Initial feature flag posture plus registry write rules.
///
/// Defaults observe without enforcing: both paths off, log-only on,
/// fail-open on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdmissionConfig {
    #[serde(default)]
    pub http_enabled: bool,

    #[serde(default)]
    pub udp_enabled: bool,

    #[serde(default = "default_true")]
    pub log_only: bool,

    #[serde(default = "default_true")]
    pub fail_open: bool,

    /// Reject source writes carrying malformed CIDRs.
    #[serde(default = "default_true")]
    pub strict_cidr: bool,

    /// `max_eps` applied to new sources that omit it. `0` is unlimited.
    #[serde(default)]
    pub default_max_eps: u64,
}

impl AdmissionConfig {
    /// Feature flags to boot with.
    pub fn flags(&self) -> FeatureFlags {
        FeatureFlags {
            http_enabled: self.http_enabled,
            udp_enabled: self.udp_enabled,
            log_only: self.log_only,
            fail_open: self.fail_open,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            http_enabled: false,
            udp_enabled: false,
            log_only: true,
            fail_open: true,
            strict_cidr: true,
            default_max_eps: 0,
        }
    }
}
