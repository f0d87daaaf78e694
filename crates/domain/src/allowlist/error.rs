use thiserror::Error;

use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum AllowlistError {
    #[error("packet filter unavailable: {0}")]
    Unavailable(String),

    #[error("allowlist sync already in progress")]
    SyncInProgress,

    #[error("packet filter command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("could not parse packet filter state: {0}")]
    Parse(String),
}

impl From<AllowlistError> for DomainError {
    fn from(err: AllowlistError) -> Self {
        match err {
            AllowlistError::Unavailable(_) => Self::Unavailable(err.to_string()),
            AllowlistError::SyncInProgress => Self::Conflict(err.to_string()),
            AllowlistError::CommandFailed { .. } | AllowlistError::Parse(_) => {
                Self::EngineError(err.to_string())
            }
        }
    }
}
