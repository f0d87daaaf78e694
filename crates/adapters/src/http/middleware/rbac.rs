use domain::auth::entity::Principal;
use domain::auth::rbac::Role;

use crate::http::error::ApiError;

/// Reject the caller with 403 unless their role grants `required`.
pub fn require_role(principal: &Principal, required: Role) -> Result<(), ApiError> {
    if principal.can(required) {
        return Ok(());
    }
    Err(ApiError::Forbidden {
        code: "INSUFFICIENT_ROLE",
        message: format!("{required} role required, caller '{}' is {}", principal.name, principal.role),
    })
}
