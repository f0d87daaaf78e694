use domain::common::error::DomainError;
use domain::ingest::entity::DeadLetter;

/// Durable storage for undeliverable payloads.
pub trait DeadLetterStore: Send + Sync {
    fn store(&self, letter: &DeadLetter) -> Result<(), DomainError>;

    /// Newest first.
    fn list(&self, limit: usize) -> Result<Vec<DeadLetter>, DomainError>;

    fn count(&self) -> Result<usize, DomainError>;
}
