use thiserror::Error;

use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The request envelope is malformed.
    #[error("schema violation: {0}")]
    Schema(String),

    #[error("record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("too many records: {count} exceeds limit {limit}")]
    TooManyRecords { count: usize, limit: usize },

    #[error("payload of {size} bytes exceeds limit {limit} ({records} records)")]
    PayloadTooLarge {
        size: usize,
        limit: usize,
        records: usize,
    },

    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl From<IngestError> for DomainError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Schema(_)
            | IngestError::InvalidRecord { .. }
            | IngestError::TooManyRecords { .. }
            | IngestError::PayloadTooLarge { .. } => Self::InvalidInput(err.to_string()),
            IngestError::Encoding(_) => Self::EngineError(err.to_string()),
        }
    }
}
