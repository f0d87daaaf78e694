use std::sync::Arc;

use application::audit_trail_service::{RequestTrace, meta};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::CONTENT_ENCODING;
use axum::{Extension, Json};
use domain::audit::entity::Stage;
use domain::auth::entity::Principal;
use domain::auth::rbac::Role;
use domain::ingest::entity::IngestRequest;
use domain::ingest::error::IngestError;
use domain::ingest::payload::gunzip;
use serde::Serialize;
use utoipa::ToSchema;

use super::error::{ApiError, ErrorBody};
use super::middleware::rbac::require_role;
use super::middleware::trace::ClientAddr;
use super::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    pub trace_id: String,
    pub received: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub exported: usize,
    pub dead_lettered: usize,
}

/// `POST /ingest`: accept a batch of flow records from a collector.
#[utoipa::path(
    post, path = "/ingest",
    tag = "Ingest",
    request_body(
        content = String,
        content_type = "application/json",
        description = "Ingest batch `{collector_id, format, records}`, optionally gzip-encoded"
    ),
    responses(
        (status = 200, description = "Batch accepted", body = IngestResponse),
        (status = 400, description = "Schema violation", body = ErrorBody),
        (status = 403, description = "Source disabled or IP not allowed", body = ErrorBody),
        (status = 413, description = "Payload too large", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
    )
)]
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Extension(trace): Extension<Arc<RequestTrace>>,
    Extension(ClientAddr(client_ip)): Extension<ClientAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    require_role(&principal, Role::Operator)?;
    trace.mark(Stage::Received, meta("bytes", body.len()));

    let limit = state.settings.body_limit;
    let gzipped = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));
    let raw = if gzipped {
        gunzip(&body, limit).map_err(decode_error)?
    } else if body.len() > limit {
        return Err(ApiError::PayloadTooLarge {
            message: format!("body of {} bytes exceeds limit {limit}", body.len()),
        });
    } else {
        body.to_vec()
    };

    let request: IngestRequest = serde_json::from_slice(&raw).map_err(|e| ApiError::BadRequest {
        code: "VALIDATION_ERROR",
        message: format!("schema violation: {e}"),
    })?;

    let counts = state.intake.ingest(request, client_ip, &trace).await?;
    Ok(Json(IngestResponse {
        trace_id: trace.trace_id().to_string(),
        received: counts.received,
        accepted: counts.accepted,
        rejected: counts.rejected,
        exported: counts.exported,
        dead_lettered: counts.dead_lettered,
    }))
}

fn decode_error(err: IngestError) -> ApiError {
    match err {
        IngestError::PayloadTooLarge { .. } => ApiError::PayloadTooLarge {
            message: err.to_string(),
        },
        other => ApiError::BadRequest {
            code: "VALIDATION_ERROR",
            message: format!("invalid gzip body: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use domain::admission::flags::FeatureFlags;
    use domain::audit::query::RequestQuery;
    use domain::ingest::payload::gzip;
    use domain::source::entity::SourceStatus;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::http::router::build_router;
    use crate::http::state::test_support::{
        ADMIN_KEY, OPERATOR_KEY, VIEWER_KEY, enforcing_flags, make_harness, make_source,
    };

    fn make_body(collector: &str, records: usize) -> Vec<u8> {
        let records: Vec<Value> = (0..records)
            .map(|i| {
                json!({
                    "time_received": 1_700_000_000 + i,
                    "src_addr": "10.0.0.1",
                    "dst_addr": "10.0.0.2",
                    "src_port": 1234,
                    "dst_port": 443,
                    "protocol": "tcp",
                    "bytes": 100,
                    "packets": 1
                })
            })
            .collect();
        serde_json::to_vec(&json!({"collector_id": collector, "records": records})).unwrap()
    }

    fn make_request(key: &str, peer: [u8; 4], body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ingest")
            .header("content-type", "application/json")
            .header("x-api-key", key)
            .extension(axum::extract::ConnectInfo(std::net::SocketAddr::from((peer, 40_000))))
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    // ── Acceptance ─────────────────────────────────────────────────

    #[tokio::test]
    async fn accepted_batch_reaches_sink_with_full_timeline() {
        let harness = make_harness(
            vec![make_source("s1", &["10.0.0.0/8"])],
            enforcing_flags(),
            true,
        );
        let router = build_router(harness.state.clone());
        let resp = router
            .oneshot(make_request(OPERATOR_KEY, [10, 1, 2, 3], make_body("s1", 3)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["accepted"], 3);
        assert_eq!(body["exported"], 3);
        assert_eq!(harness.sink.delivered_count(), 3);

        let page = harness.state.audit.query(&RequestQuery::default());
        let stages: Vec<&str> = page.items[0]
            .timeline
            .stages()
            .into_iter()
            .map(|s| s.as_str())
            .collect();
        assert_eq!(stages, ["received", "validated", "enriched", "exported", "completed"]);
        assert_eq!(page.items[0].source_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn gzip_body_is_inflated() {
        let harness = make_harness(
            vec![make_source("s1", &["10.0.0.0/8"])],
            enforcing_flags(),
            false,
        );
        let mut req = make_request(ADMIN_KEY, [10, 0, 0, 9], gzip(&make_body("s1", 2)).unwrap());
        req.headers_mut()
            .insert("content-encoding", "gzip".parse().unwrap());
        let resp = build_router(harness.state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["received"], 2);
    }

    // ── Rejections ─────────────────────────────────────────────────

    #[tokio::test]
    async fn viewer_cannot_ingest() {
        let harness = make_harness(Vec::new(), FeatureFlags::default(), true);
        let resp = build_router(harness.state)
            .oneshot(make_request(VIEWER_KEY, [10, 0, 0, 1], make_body("s1", 1)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_json_is_400_without_validated_stage() {
        let harness = make_harness(Vec::new(), FeatureFlags::default(), false);
        let resp = build_router(harness.state.clone())
            .oneshot(make_request(ADMIN_KEY, [10, 0, 0, 1], b"{not json".to_vec()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let page = harness.state.audit.query(&RequestQuery::default());
        let stages: Vec<&str> = page.items[0]
            .timeline
            .stages()
            .into_iter()
            .map(|s| s.as_str())
            .collect();
        assert_eq!(stages, ["received", "completed"]);
    }

    #[tokio::test]
    async fn disabled_source_is_403_with_reason() {
        let mut disabled = make_source("s2", &["10.0.0.0/8"]);
        disabled.status = SourceStatus::Disabled;
        let harness = make_harness(vec![disabled], enforcing_flags(), false);
        let resp = build_router(harness.state.clone())
            .oneshot(make_request(ADMIN_KEY, [10, 0, 0, 1], make_body("s2", 1)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(resp).await["reason"], "disabled");
        assert_eq!(harness.sink.delivered_count(), 0);
        assert_eq!(
            harness.state.metrics.snapshot().blocked_source_total["s2"]["disabled"],
            1
        );
    }

    #[tokio::test]
    async fn ip_outside_allowlist_is_403() {
        let harness = make_harness(
            vec![make_source("s1", &["10.0.0.0/8"])],
            enforcing_flags(),
            false,
        );
        let resp = build_router(harness.state)
            .oneshot(make_request(ADMIN_KEY, [192, 168, 1, 100], make_body("s1", 1)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(resp).await["reason"], "ip_not_allowed");
    }

    #[tokio::test]
    async fn log_only_admits_but_counts() {
        let mut disabled = make_source("s2", &["10.0.0.0/8"]);
        disabled.status = SourceStatus::Disabled;
        let flags = FeatureFlags {
            log_only: true,
            ..enforcing_flags()
        };
        let harness = make_harness(vec![disabled], flags, false);
        let resp = build_router(harness.state.clone())
            .oneshot(make_request(ADMIN_KEY, [10, 0, 0, 1], make_body("s2", 1)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            harness.state.metrics.snapshot().blocked_source_total["s2"]["disabled"],
            1
        );
    }

    #[tokio::test]
    async fn too_many_records_is_413() {
        let harness = make_harness(Vec::new(), FeatureFlags::default(), false);
        let resp = build_router(harness.state)
            .oneshot(make_request(ADMIN_KEY, [10, 0, 0, 1], make_body("s1", 1_001)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn garbage_gzip_is_400() {
        let harness = make_harness(Vec::new(), FeatureFlags::default(), false);
        let mut req = make_request(ADMIN_KEY, [10, 0, 0, 1], b"not gzip".to_vec());
        req.headers_mut()
            .insert("content-encoding", "gzip".parse().unwrap());
        let resp = build_router(harness.state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
