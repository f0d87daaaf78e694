use thiserror::Error;

use crate::common::error::DomainError;
use crate::common::network::CidrParseError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source not found: {id}")]
    NotFound { id: String },

    #[error("source already exists: {id}")]
    Duplicate { id: String },

    #[error("invalid source id: {0}")]
    InvalidId(String),

    #[error("{0}")]
    InvalidCidr(#[from] CidrParseError),

    #[error("invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
}

impl From<SourceError> for DomainError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound { id } => Self::NotFound(id),
            SourceError::Duplicate { id } => Self::Duplicate(id),
            SourceError::InvalidId(_)
            | SourceError::InvalidCidr(_)
            | SourceError::InvalidField { .. } => Self::InvalidInput(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            SourceError::NotFound { id: "s1".into() }.to_string(),
            "source not found: s1"
        );
        let cidr = "10.0.0.0/99".parse::<crate::common::network::IpNetwork>().unwrap_err();
        let err = SourceError::from(cidr);
        assert!(err.to_string().starts_with("invalid CIDR '10.0.0.0/99'"));
    }

    #[test]
    fn maps_into_domain_error() {
        let err: DomainError = SourceError::NotFound { id: "s1".into() }.into();
        assert!(matches!(err, DomainError::NotFound(ref id) if id == "s1"));
        let err: DomainError = SourceError::Duplicate { id: "s1".into() }.into();
        assert!(matches!(err, DomainError::Duplicate(_)));
        let err: DomainError = SourceError::InvalidId("empty".into()).into();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }
}
