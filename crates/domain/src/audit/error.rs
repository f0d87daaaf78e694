use thiserror::Error;

use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("timeline stage {stage} out of order after {last}")]
    OutOfOrder { stage: String, last: String },
}

impl From<AuditError> for DomainError {
    fn from(err: AuditError) -> Self {
        Self::EngineError(err.to_string())
    }
}
