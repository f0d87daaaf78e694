use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why an admission check produced its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    Ok,
    UnknownSource,
    Disabled,
    IpNotAllowed,
    RateLimit,
    /// Every `allowed_ips` entry of the source is malformed.
    InvalidAllowlist,
    /// The engine failed internally and the fail-open flag decided.
    InternalError,
}

impl AdmissionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::UnknownSource => "unknown_source",
            Self::Disabled => "disabled",
            Self::IpNotAllowed => "ip_not_allowed",
            Self::RateLimit => "rate_limit",
            Self::InvalidAllowlist => "invalid_allowlist",
            Self::InternalError => "internal_error",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which intake entry point asked for the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakePath {
    Http,
    Udp,
}

impl IntakePath {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Udp => "udp",
        }
    }
}

/// Inputs to a single admission check.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    /// Empty when the caller could not attribute the traffic.
    pub source_id: &'a str,
    pub client_ip: IpAddr,
    pub record_count: u64,
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: AdmissionReason,
    /// Only set on `rate_limit` blocks.
    pub retry_after: Option<Duration>,
    /// Rate exceeded on a source with `block_on_exceed = false`.
    pub over_limit: bool,
    /// A block was converted to allow by the log-only flag.
    pub log_only_override: bool,
}

impl Decision {
    pub fn allow(reason: AdmissionReason) -> Self {
        Self {
            allowed: true,
            reason,
            retry_after: None,
            over_limit: false,
            log_only_override: false,
        }
    }

    pub fn block(reason: AdmissionReason) -> Self {
        Self {
            allowed: false,
            ..Self::allow(reason)
        }
    }

    /// Allow or block depending on the fail-open posture.
    pub fn by_posture(fail_open: bool, reason: AdmissionReason) -> Self {
        if fail_open {
            Self::allow(reason)
        } else {
            Self::block(reason)
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Convert a block into an allow, keeping the original reason.
    #[must_use]
    pub fn apply_log_only(mut self, log_only: bool) -> Self {
        if log_only && !self.allowed {
            self.allowed = true;
            self.log_only_override = true;
            self.retry_after = None;
        }
        self
    }
}
