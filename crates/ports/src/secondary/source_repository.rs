use domain::common::error::DomainError;
use domain::source::entity::Source;

/// Persistent CRUD store behind the source registry.
pub trait SourceRepository: Send + Sync {
    fn list(&self) -> Result<Vec<Source>, DomainError>;

    fn get(&self, id: &str) -> Result<Option<Source>, DomainError>;

    /// Fails with `Duplicate` if the id exists.
    fn create(&self, source: &Source) -> Result<(), DomainError>;

    /// Fails with `NotFound` if the id does not exist.
    fn update(&self, source: &Source) -> Result<(), DomainError>;

    /// Fails with `NotFound` if the id does not exist.
    fn delete(&self, id: &str) -> Result<(), DomainError>;
}
