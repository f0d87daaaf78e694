use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use utoipa::ToSchema;

use super::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct ComponentHealth {
    /// At least one snapshot has been loaded from the repository.
    pub registry_loaded: bool,
    pub source_count: usize,
    pub snapshot_version: u64,
    pub packet_filter_available: bool,
    pub sinks: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// `"ok"`, `"degraded"` (running without a packet filter or sinks),
    /// or `"not_ready"` (no registry snapshot yet).
    #[schema(value_type = String)]
    pub status: &'static str,
    pub version: String,
    pub uptime_secs: u64,
    pub components: ComponentHealth,
}

/// Component readiness. 503 until the source registry has loaded.
#[utoipa::path(
    get, path = "/healthz",
    tag = "Health",
    responses(
        (status = 200, description = "Gateway is serving", body = HealthResponse),
        (status = 503, description = "Registry not loaded", body = HealthResponse),
    )
)]
pub async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot();
    let components = ComponentHealth {
        registry_loaded: snapshot.version() > 0,
        source_count: snapshot.len(),
        snapshot_version: snapshot.version(),
        packet_filter_available: state.allowlist.status().await.available,
        sinks: state.intake.sink_names(),
    };
    let (code, status) = if !components.registry_loaded {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    } else if !components.packet_filter_available || components.sinks.is_empty() {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: state.version.to_string(),
            uptime_secs: state.start_time.elapsed().as_secs(),
            components,
        }),
    )
}
