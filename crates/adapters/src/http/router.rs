use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, patch, post};
use utoipa::OpenApi;

use super::admin_handler::{
    allowlist_status, flag_history, get_flags, list_dead_letters, patch_flags, sync_allowlist,
};
use super::health_handler::healthz;
use super::ingest_handler::ingest;
use super::metrics_handler::{metrics_json, metrics_prometheus};
use super::middleware::auth::auth_middleware;
use super::middleware::trace::trace_middleware;
use super::openapi::ApiDoc;
use super::request_handler::{list_requests, request_summary, stream_requests};
use super::source_handler::{
    create_source, delete_source, get_source, list_sources, test_admission, update_source,
};
use super::state::AppState;

/// Body cap for everything except `/ingest`.
const MAX_API_BODY_SIZE: usize = 64 * 1024;

/// Build the gateway router.
///
/// Routes are split into two groups:
/// 1. **Public** (no auth): `/healthz`, `/metrics`, `/metrics/prometheus`,
///    `/api-docs/openapi.json`
/// 2. **Protected**: ingest, sources, admin and the request log. Every
///    request gets a [`Principal`](domain::auth::entity::Principal); each
///    handler checks its own role.
///
/// The trace middleware wraps both groups so every request carries a
/// trace id and lands in the audit trail unless its path is excluded.
pub fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_json))
        .route("/metrics/prometheus", get(metrics_prometheus))
        .route(
            "/api-docs/openapi.json",
            get(|| async { axum::Json(ApiDoc::openapi()) }),
        );

    let ingest_routes = Router::new()
        .route("/ingest", post(ingest))
        .layer(DefaultBodyLimit::max(state.settings.body_limit));

    let api_routes = Router::new()
        .route("/sources", get(list_sources).post(create_source))
        .route(
            "/sources/{id}",
            get(get_source).put(update_source).delete(delete_source),
        )
        .route("/sources/{id}/admission/test", post(test_admission))
        .route("/admin/featureflags", get(get_flags))
        .route("/admin/featureflags", patch(patch_flags))
        .route("/admin/featureflags/history", get(flag_history))
        .route("/admin/security/allowlist/status", get(allowlist_status))
        .route("/admin/security/sync-allowlist", post(sync_allowlist))
        .route("/admin/dead-letters", get(list_dead_letters))
        .route("/admin/requests", get(list_requests))
        .route("/admin/requests/summary", get(request_summary))
        .route("/logs/stream", get(stream_requests))
        .layer(DefaultBodyLimit::max(MAX_API_BODY_SIZE));

    let protected_routes = ingest_routes
        .merge(api_routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    public_routes
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            trace_middleware,
        ))
        .with_state(state)
}
