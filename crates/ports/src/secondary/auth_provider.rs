use domain::auth::entity::Principal;
use domain::auth::error::AuthError;

/// Port for credential validation.
///
/// Synchronous: key lookup is a hash and a map read.
pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Principal, AuthError>;
}
