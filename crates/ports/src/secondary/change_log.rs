use domain::audit::change::ChangeEntry;
use domain::common::error::DomainError;

/// Durable log of runtime mutations (feature flags, registry writes).
pub trait ChangeLogSink: Send + Sync {
    fn record(&self, entry: &ChangeEntry) -> Result<(), DomainError>;

    /// Newest first.
    fn recent(&self, limit: usize) -> Result<Vec<ChangeEntry>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_is_object_safe() {
        fn _accepts_dyn(_s: &dyn ChangeLogSink) {}
    }
}
