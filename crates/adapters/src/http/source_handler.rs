use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use domain::audit::change::ChangeActor;
use domain::auth::entity::Principal;
use domain::auth::rbac::Role;
use domain::source::entity::{HealthStatus, Source, SourceStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::{ApiError, ErrorBody};
use super::middleware::rbac::require_role;
use super::state::AppState;

// ── Request / Response DTOs ─────────────────────────────────────────

fn default_status() -> String {
    SourceStatus::Enabled.as_str().to_string()
}

fn default_block_on_exceed() -> bool {
    true
}

#[derive(Deserialize, ToSchema)]
pub struct SourceRequest {
    /// Required on create; on update it may be omitted or must match the path.
    #[serde(default)]
    pub id: String,
    pub tenant_id: String,
    /// Collector flavour, e.g. `netflow`, `sflow`, `ipfix`.
    #[serde(rename = "type")]
    pub source_type: String,
    /// `enabled` or `disabled`. Defaults to `enabled`.
    #[serde(default = "default_status")]
    pub status: String,
    /// CIDR strings; IPv4 and IPv6 may be mixed.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    /// Records per second, `0` for unlimited. Defaults to the configured value.
    pub max_eps: Option<u64>,
    #[serde(default = "default_block_on_exceed")]
    pub block_on_exceed: bool,
    pub description: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SourceResponse {
    pub id: String,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub status: String,
    /// `healthy`, `degraded`, or `stale`, from observed traffic.
    pub health_status: String,
    pub allowed_ips: Vec<String>,
    pub max_eps: u64,
    pub block_on_exceed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

#[derive(Serialize, ToSchema)]
pub struct SourceListResponse {
    pub sources: Vec<SourceResponse>,
    pub count: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct AdmissionTestRequest {
    pub client_ip: String,
    /// Records the hypothetical request would carry. Defaults to 1.
    pub record_count: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct AdmissionTestResponse {
    pub source_id: String,
    pub client_ip: String,
    pub allowed: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    pub over_limit: bool,
}

// ── Conversion helpers ──────────────────────────────────────────────

impl SourceRequest {
    fn into_source(self, default_max_eps: u64) -> Result<Source, ApiError> {
        let status = self
            .status
            .parse::<SourceStatus>()
            .map_err(|message| ApiError::BadRequest {
                code: "VALIDATION_ERROR",
                message,
            })?;
        Ok(Source {
            id: self.id,
            tenant_id: self.tenant_id,
            source_type: self.source_type,
            status,
            health_status: HealthStatus::default(),
            allowed_ips: self.allowed_ips,
            max_eps: self.max_eps.unwrap_or(default_max_eps),
            block_on_exceed: self.block_on_exceed,
            description: self.description,
            created_at_ms: 0,
            updated_at_ms: 0,
        })
    }
}

impl From<Source> for SourceResponse {
    fn from(s: Source) -> Self {
        Self {
            id: s.id,
            tenant_id: s.tenant_id,
            source_type: s.source_type,
            status: s.status.as_str().to_string(),
            health_status: s.health_status.as_str().to_string(),
            allowed_ips: s.allowed_ips,
            max_eps: s.max_eps,
            block_on_exceed: s.block_on_exceed,
            description: s.description,
            created_at_ms: s.created_at_ms,
            updated_at_ms: s.updated_at_ms,
        }
    }
}

fn actor(principal: &Principal) -> ChangeActor {
    ChangeActor::Api(principal.name.clone())
}

// ── Handlers ────────────────────────────────────────────────────────

/// `GET /sources`
#[utoipa::path(
    get, path = "/sources",
    tag = "Sources",
    responses((status = 200, description = "All registered sources", body = SourceListResponse))
)]
pub async fn list_sources(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<SourceListResponse>, ApiError> {
    require_role(&principal, Role::Viewer)?;
    let sources: Vec<SourceResponse> = state
        .registry
        .list()
        .into_iter()
        .map(SourceResponse::from)
        .collect();
    let count = sources.len();
    Ok(Json(SourceListResponse { sources, count }))
}

/// `GET /sources/{id}`
#[utoipa::path(
    get, path = "/sources/{id}",
    tag = "Sources",
    params(("id" = String, Path, description = "Source identifier")),
    responses(
        (status = 200, description = "Source", body = SourceResponse),
        (status = 404, description = "Unknown source", body = ErrorBody),
    )
)]
pub async fn get_source(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<SourceResponse>, ApiError> {
    require_role(&principal, Role::Viewer)?;
    Ok(Json(state.registry.get(&id)?.into()))
}

/// `POST /sources`
#[utoipa::path(
    post, path = "/sources",
    tag = "Sources",
    request_body = SourceRequest,
    responses(
        (status = 201, description = "Source created", body = SourceResponse),
        (status = 400, description = "Validation error", body = ErrorBody),
        (status = 409, description = "Id already registered", body = ErrorBody),
    )
)]
pub async fn create_source(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<SourceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&principal, Role::Admin)?;
    let source = body.into_source(state.settings.default_max_eps)?;
    let created = state.registry.create(source, actor(&principal))?;
    Ok((StatusCode::CREATED, Json(SourceResponse::from(created))))
}

/// `PUT /sources/{id}`
#[utoipa::path(
    put, path = "/sources/{id}",
    tag = "Sources",
    params(("id" = String, Path, description = "Source identifier")),
    request_body = SourceRequest,
    responses(
        (status = 200, description = "Source replaced", body = SourceResponse),
        (status = 400, description = "Validation error", body = ErrorBody),
        (status = 404, description = "Unknown source", body = ErrorBody),
    )
)]
pub async fn update_source(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<SourceRequest>,
) -> Result<Json<SourceResponse>, ApiError> {
    require_role(&principal, Role::Admin)?;
    let source = body.into_source(state.settings.default_max_eps)?;
    let updated = state.registry.update(&id, source, actor(&principal))?;
    Ok(Json(updated.into()))
}

/// `DELETE /sources/{id}`
#[utoipa::path(
    delete, path = "/sources/{id}",
    tag = "Sources",
    params(("id" = String, Path, description = "Source identifier")),
    responses(
        (status = 204, description = "Source deleted"),
        (status = 404, description = "Unknown source", body = ErrorBody),
    )
)]
pub async fn delete_source(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_role(&principal, Role::Admin)?;
    state.registry.delete(&id, actor(&principal))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /sources/{id}/admission/test`: dry-run admission for an IP.
///
/// Ignores the intake path flags and log-only, and consumes no rate budget.
#[utoipa::path(
    post, path = "/sources/{id}/admission/test",
    tag = "Sources",
    params(("id" = String, Path, description = "Source identifier")),
    request_body = AdmissionTestRequest,
    responses(
        (status = 200, description = "Hypothetical decision", body = AdmissionTestResponse),
        (status = 400, description = "Invalid client IP", body = ErrorBody),
        (status = 404, description = "Unknown source", body = ErrorBody),
    )
)]
pub async fn test_admission(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<AdmissionTestRequest>,
) -> Result<Json<AdmissionTestResponse>, ApiError> {
    require_role(&principal, Role::Operator)?;
    let ip: IpAddr = body.client_ip.trim().parse().map_err(|_| ApiError::BadRequest {
        code: "VALIDATION_ERROR",
        message: format!("invalid client_ip '{}'", body.client_ip),
    })?;
    let decision = state
        .admission
        .test_admission(&id, ip, body.record_count.unwrap_or(1))?;
    Ok(Json(AdmissionTestResponse {
        source_id: id,
        client_ip: ip.to_string(),
        allowed: decision.allowed,
        reason: decision.reason.as_str().to_string(),
        retry_after_secs: decision.retry_after.map(|d| d.as_secs().max(1)),
        over_limit: decision.over_limit,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use domain::admission::flags::FeatureFlags;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::http::router::build_router;
    use crate::http::state::test_support::{
        ADMIN_KEY, OPERATOR_KEY, VIEWER_KEY, make_harness, make_source,
    };

    fn make_request(method: &str, uri: &str, key: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {key}"));
        match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn make_create_body(id: &str) -> Value {
        json!({
            "id": id,
            "tenant_id": "tenant-b",
            "type": "sflow",
            "allowed_ips": ["192.0.2.0/24", "2001:db8::/32"]
        })
    }

    // ── CRUD ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_list_get_delete() {
        let harness = make_harness(Vec::new(), FeatureFlags::default(), true);
        let router = build_router(harness.state.clone());

        let resp = router
            .clone()
            .oneshot(make_request("POST", "/sources", ADMIN_KEY, Some(make_create_body("edge-1"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = json_body(resp).await;
        assert_eq!(created["status"], "enabled");
        assert_eq!(created["health_status"], "stale");
        assert_eq!(created["block_on_exceed"], true);

        let resp = router
            .clone()
            .oneshot(make_request("GET", "/sources", VIEWER_KEY, None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["count"], 1);

        let resp = router
            .clone()
            .oneshot(make_request("GET", "/sources/edge-1", VIEWER_KEY, None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["type"], "sflow");

        let resp = router
            .clone()
            .oneshot(make_request("DELETE", "/sources/edge-1", ADMIN_KEY, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = router
            .oneshot(make_request("GET", "/sources/edge-1", VIEWER_KEY, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_create_is_409() {
        let harness = make_harness(
            vec![make_source("edge-1", &["10.0.0.0/8"])],
            FeatureFlags::default(),
            true,
        );
        let resp = build_router(harness.state)
            .oneshot(make_request("POST", "/sources", ADMIN_KEY, Some(make_create_body("edge-1"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_cidr_is_400() {
        let harness = make_harness(Vec::new(), FeatureFlags::default(), true);
        let mut body = make_create_body("edge-1");
        body["allowed_ips"] = json!(["10.0.0.0/33"]);
        let resp = build_router(harness.state)
            .oneshot(make_request("POST", "/sources", ADMIN_KEY, Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_disables_source() {
        let harness = make_harness(
            vec![make_source("edge-1", &["10.0.0.0/8"])],
            FeatureFlags::default(),
            true,
        );
        let mut body = make_create_body("edge-1");
        body["status"] = json!("disabled");
        let resp = build_router(harness.state.clone())
            .oneshot(make_request("PUT", "/sources/edge-1", ADMIN_KEY, Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "disabled");
        assert_eq!(
            harness.state.registry.get("edge-1").unwrap().status.as_str(),
            "disabled"
        );
    }

    // ── RBAC ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn operator_cannot_create() {
        let harness = make_harness(Vec::new(), FeatureFlags::default(), true);
        let resp = build_router(harness.state)
            .oneshot(make_request("POST", "/sources", OPERATOR_KEY, Some(make_create_body("x"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_key_is_401() {
        let harness = make_harness(Vec::new(), FeatureFlags::default(), true);
        let req = Request::builder().uri("/sources").body(Body::empty()).unwrap();
        let resp = build_router(harness.state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    // ── Admission test ─────────────────────────────────────────────

    #[tokio::test]
    async fn admission_test_reports_reason() {
        let harness = make_harness(
            vec![make_source("edge-1", &["10.0.0.0/8"])],
            FeatureFlags::default(),
            true,
        );
        let router = build_router(harness.state);

        let resp = router
            .clone()
            .oneshot(make_request(
                "POST",
                "/sources/edge-1/admission/test",
                OPERATOR_KEY,
                Some(json!({"client_ip": "10.9.9.9"})),
            ))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["allowed"], true);
        assert_eq!(body["reason"], "ok");

        let resp = router
            .clone()
            .oneshot(make_request(
                "POST",
                "/sources/edge-1/admission/test",
                OPERATOR_KEY,
                Some(json!({"client_ip": "192.168.1.1"})),
            ))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["allowed"], false);
        assert_eq!(body["reason"], "ip_not_allowed");

        let resp = router
            .oneshot(make_request(
                "POST",
                "/sources/edge-1/admission/test",
                OPERATOR_KEY,
                Some(json!({"client_ip": "not-an-ip"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admission_test_unknown_source_is_404() {
        let harness = make_harness(Vec::new(), FeatureFlags::default(), true);
        let resp = build_router(harness.state)
            .oneshot(make_request(
                "POST",
                "/sources/ghost/admission/test",
                OPERATOR_KEY,
                Some(json!({"client_ip": "10.0.0.1"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
