use thiserror::Error;

use crate::common::error::DomainError;

/// Failures inside the admission engine itself, as opposed to policy
/// blocks. Callers resolve these through the fail-open flag.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("rate limiter state poisoned for source {source_id}")]
    BucketPoisoned { source_id: String },

    #[error("internal admission error: {0}")]
    Internal(String),
}

impl From<AdmissionError> for DomainError {
    fn from(err: AdmissionError) -> Self {
        Self::EngineError(err.to_string())
    }
}
