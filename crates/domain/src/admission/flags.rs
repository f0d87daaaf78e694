use serde::{Deserialize, Serialize};

/// Process-wide admission toggles.
///
/// The default posture keeps enforcement off, so a fresh deployment
/// only observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub http_enabled: bool,
    pub udp_enabled: bool,
    pub log_only: bool,
    pub fail_open: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            http_enabled: false,
            udp_enabled: false,
            log_only: true,
            fail_open: true,
        }
    }
}

/// Partial update. Absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_open: Option<bool>,
}

impl FlagPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn apply(&self, current: FeatureFlags) -> FeatureFlags {
        FeatureFlags {
            http_enabled: self.http_enabled.unwrap_or(current.http_enabled),
            udp_enabled: self.udp_enabled.unwrap_or(current.udp_enabled),
            log_only: self.log_only.unwrap_or(current.log_only),
            fail_open: self.fail_open.unwrap_or(current.fail_open),
        }
    }

    /// Names of the flags this patch would change, in env-var spelling.
    pub fn changed_names(&self, current: FeatureFlags) -> Vec<&'static str> {
        let next = self.apply(current);
        let mut names = Vec::new();
        if next.http_enabled != current.http_enabled {
            names.push("ADMISSION_HTTP_ENABLED");
        }
        if next.udp_enabled != current.udp_enabled {
            names.push("ADMISSION_UDP_ENABLED");
        }
        if next.log_only != current.log_only {
            names.push("ADMISSION_LOG_ONLY");
        }
        if next.fail_open != current.fail_open {
            names.push("ADMISSION_FAIL_OPEN");
        }
        names
    }
}
