use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use domain::auth::entity::Principal;
use domain::auth::rbac::Role;

use super::super::error::ApiError;
use super::super::state::AppState;

/// Name given to requests when authentication is disabled.
pub const ANONYMOUS: &str = "anonymous";

/// Axum middleware that authenticates the caller via the `AuthProvider`
/// and attaches the resulting [`Principal`] as a request extension.
///
/// Supports two credential headers (tried in order):
/// 1. `Authorization: Bearer <key>`
/// 2. `X-API-Key: <key>`
///
/// With no provider configured every request runs as an anonymous admin.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = match state.auth_provider {
        None => Principal::new(ANONYMOUS, Role::Admin),
        Some(ref provider) => {
            let token = extract_token(&request)?;
            provider.authenticate(token)?
        }
    };
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Extract the credential, checking `Authorization: Bearer` first, then
/// `X-API-Key`.
fn extract_token(request: &Request) -> Result<&str, ApiError> {
    if let Some(auth_header) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        && let Some(token) = auth_header.strip_prefix("Bearer ")
    {
        return Ok(token.trim());
    }

    if let Some(api_key) = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
    {
        return Ok(api_key.trim());
    }

    Err(ApiError::Unauthorized {
        message: "authentication required: no credential provided".to_string(),
    })
}
