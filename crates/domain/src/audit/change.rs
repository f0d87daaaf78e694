use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::entity::current_timestamp_ms;

/// Who initiated a runtime change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum ChangeActor {
    /// Authenticated API caller, by key name.
    Api(String),
    /// Applied from configuration at startup.
    Config,
    Cli,
}

impl std::fmt::Display for ChangeActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api(name) => write!(f, "api:{name}"),
            Self::Config => f.write_str("config"),
            Self::Cli => f.write_str("cli"),
        }
    }
}

/// Record of a mutation to runtime state. Before and after are JSON
/// snapshots so any target type fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub timestamp_ms: u64,
    pub actor: ChangeActor,
    /// e.g. `update_feature_flags`, `create_source`.
    pub action: String,
    /// e.g. `feature_flags`, `source:s1`.
    pub target: String,
    pub before: Value,
    pub after: Value,
}

impl ChangeEntry {
    pub fn new(
        actor: ChangeActor,
        action: impl Into<String>,
        target: impl Into<String>,
        before: Value,
        after: Value,
    ) -> Self {
        Self {
            timestamp_ms: current_timestamp_ms(),
            actor,
            action: action.into(),
            target: target.into(),
            before,
            after,
        }
    }
}
