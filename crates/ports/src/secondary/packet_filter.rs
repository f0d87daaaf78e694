use std::future::Future;
use std::pin::Pin;

use domain::allowlist::entity::{AllowlistDelta, AllowlistSet};
use domain::common::error::DomainError;

/// Host packet filter holding the kernel-level allowlist.
///
/// Kept narrow so reconciliation logic can run against an in-memory fake.
pub trait PacketFilterPort: Send + Sync {
    /// Whether the filtering mechanism exists on this host.
    fn available(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    fn current_set(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<AllowlistSet, DomainError>> + Send + '_>>;

    /// Apply adds and removes. Must not flush the whole set.
    fn apply<'a>(
        &'a self,
        delta: &'a AllowlistDelta,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>>;
}
