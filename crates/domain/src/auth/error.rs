use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required: no token provided")]
    TokenMissing,

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    #[error("access denied: {0}")]
    Forbidden(String),
}
