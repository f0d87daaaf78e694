//! Static CIDR enrichment table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::common::{ConfigError, MAX_ENRICHMENT_ENTRIES, check_limit, default_true, validate_cidr};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tags attached to flows whose source or destination falls inside
    /// `cidr`. Most specific prefix wins.
    #[serde(default)]
    pub cidr_tags: Vec<CidrTagConfig>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cidr_tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CidrTagConfig {
    pub cidr: String,
    pub tags: BTreeMap<String, String>,
}

impl EnrichmentConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        check_limit(
            "enrichment.cidr_tags",
            self.cidr_tags.len(),
            MAX_ENRICHMENT_ENTRIES,
        )?;
        for (idx, entry) in self.cidr_tags.iter().enumerate() {
            validate_cidr(&entry.cidr)?;
            if entry.tags.is_empty() {
                return Err(ConfigError::Validation {
                    field: format!("enrichment.cidr_tags[{idx}].tags"),
                    message: "at least one tag is required".to_string(),
                });
            }
        }
        Ok(())
    }
}
