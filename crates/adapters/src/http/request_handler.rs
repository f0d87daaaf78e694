use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header::{ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use domain::audit::entity::AuditRecord;
use domain::audit::query::{RequestQuery, WindowSummary};
use domain::audit::ring::PollResult;
use domain::auth::entity::Principal;
use domain::auth::rbac::Role;
use infrastructure::constants::SSE_KEEPALIVE_INTERVAL;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use utoipa::{IntoParams, ToSchema};

use super::error::ApiError;
use super::middleware::rbac::require_role;
use super::state::AppState;

// ── Request / Response DTOs ─────────────────────────────────────────

#[derive(Deserialize, IntoParams)]
pub struct RequestQueryParams {
    pub method: Option<String>,
    /// Path prefix.
    pub path: Option<String>,
    pub status_min: Option<u16>,
    pub status_max: Option<u16>,
    pub tenant_id: Option<String>,
    pub source_id: Option<String>,
    pub trace_id: Option<String>,
    /// Milliseconds since epoch, inclusive.
    pub since_ms: Option<u64>,
    /// Defaults to 100, capped at 1000.
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Serialize, ToSchema)]
pub struct TimelineEventResponse {
    pub stage: String,
    pub elapsed_us: u64,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

#[derive(Serialize, ToSchema)]
pub struct AuditRecordResponse {
    pub id: String,
    pub seq: u64,
    pub timestamp_ms: u64,
    pub method: String,
    pub path: String,
    pub client_ip: String,
    pub tenant_id: Option<String>,
    pub source_id: Option<String>,
    pub status: u16,
    pub latency_us: u64,
    pub record_count: u64,
    pub admission_reason: Option<String>,
    pub timeline: Vec<TimelineEventResponse>,
}

#[derive(Serialize, ToSchema)]
pub struct RequestPageResponse {
    pub items: Vec<AuditRecordResponse>,
    /// Matching records before pagination.
    pub total: usize,
    pub etag: u64,
}

#[derive(Serialize, ToSchema)]
pub struct SummaryResponse {
    pub window_secs: u64,
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub eps: f64,
    pub records: u64,
}

// ── Conversion helpers ──────────────────────────────────────────────

impl From<RequestQueryParams> for RequestQuery {
    fn from(p: RequestQueryParams) -> Self {
        Self {
            method: p.method,
            path: p.path,
            status_min: p.status_min,
            status_max: p.status_max,
            tenant_id: p.tenant_id,
            source_id: p.source_id,
            trace_id: p.trace_id,
            since_ms: p.since_ms,
            limit: p.limit,
            offset: p.offset,
        }
    }
}

impl From<&AuditRecord> for AuditRecordResponse {
    fn from(r: &AuditRecord) -> Self {
        Self {
            id: r.id.clone(),
            seq: r.seq,
            timestamp_ms: r.timestamp_ms,
            method: r.method.clone(),
            path: r.path.clone(),
            client_ip: r.client_ip.clone(),
            tenant_id: r.tenant_id.clone(),
            source_id: r.source_id.clone(),
            status: r.status,
            latency_us: r.latency_us,
            record_count: r.record_count,
            admission_reason: r.admission_reason.clone(),
            timeline: r
                .timeline
                .events()
                .iter()
                .map(|e| TimelineEventResponse {
                    stage: e.stage.as_str().to_string(),
                    elapsed_us: e.elapsed_us,
                    metadata: serde_json::to_value(&e.metadata).unwrap_or_default(),
                })
                .collect(),
        }
    }
}

impl From<WindowSummary> for SummaryResponse {
    fn from(s: WindowSummary) -> Self {
        Self {
            window_secs: s.window_secs,
            requests: s.requests,
            successes: s.successes,
            errors: s.errors,
            success_rate: s.success_rate,
            avg_latency_ms: s.avg_latency_ms,
            eps: s.eps,
            records: s.records,
        }
    }
}

/// Accepts `"42"`, `W/"42"`, or a bare `42`.
fn parse_etag(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(IF_NONE_MATCH)?.to_str().ok()?.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    raw.trim_matches('"').parse().ok()
}

fn etag_value(etag: u64) -> HeaderValue {
    HeaderValue::from_str(&format!("\"{etag}\"")).unwrap_or(HeaderValue::from_static("\"0\""))
}

fn not_modified(etag: u64) -> Response {
    (StatusCode::NOT_MODIFIED, [(ETAG, etag_value(etag))]).into_response()
}

// ── Handlers ────────────────────────────────────────────────────────

/// `GET /admin/requests`: recent request records, newest first.
///
/// With `If-None-Match`, returns 304 when nothing was recorded since
/// that ETag, otherwise only the records appended after it.
#[utoipa::path(
    get, path = "/admin/requests",
    tag = "Requests",
    params(RequestQueryParams),
    responses(
        (status = 200, description = "Audit records", body = RequestPageResponse),
        (status = 304, description = "No new records since the ETag"),
    )
)]
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Query(params): Query<RequestQueryParams>,
) -> Result<Response, ApiError> {
    require_role(&principal, Role::Admin)?;
    let query = RequestQuery::from(params);

    let page = match parse_etag(&headers) {
        Some(tag) => match state.audit.poll(Some(tag)) {
            PollResult::NotModified => return Ok(not_modified(tag)),
            PollResult::Changed { items, etag } => {
                let limit = query
                    .limit
                    .unwrap_or(RequestQuery::DEFAULT_LIMIT)
                    .min(RequestQuery::MAX_LIMIT);
                let matching: Vec<AuditRecordResponse> = items
                    .iter()
                    .rev()
                    .filter(|r| query.matches(r))
                    .map(|r| AuditRecordResponse::from(r.as_ref()))
                    .collect();
                let total = matching.len();
                RequestPageResponse {
                    items: matching.into_iter().take(limit).collect(),
                    total,
                    etag,
                }
            }
        },
        None => {
            let page = state.audit.query(&query);
            RequestPageResponse {
                items: page
                    .items
                    .iter()
                    .map(|r| AuditRecordResponse::from(r.as_ref()))
                    .collect(),
                total: page.total,
                etag: page.etag,
            }
        }
    };

    let etag = etag_value(page.etag);
    Ok(([(ETAG, etag)], Json(page)).into_response())
}

/// `GET /admin/requests/summary`: aggregates over the recent window.
#[utoipa::path(
    get, path = "/admin/requests/summary",
    tag = "Requests",
    responses(
        (status = 200, description = "Window summary", body = SummaryResponse),
        (status = 304, description = "No new records since the ETag"),
    )
)]
pub async fn request_summary(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_role(&principal, Role::Admin)?;
    let head = state.audit.head();
    if parse_etag(&headers) == Some(head) {
        return Ok(not_modified(head));
    }
    let summary = SummaryResponse::from(state.audit.summary(state.settings.summary_window_secs));
    Ok(([(ETAG, etag_value(head))], Json(summary)).into_response())
}

/// `GET /logs/stream`: server-sent events, one `request` event per
/// recorded request. Slow consumers skip what they missed.
#[utoipa::path(
    get, path = "/logs/stream",
    tag = "Requests",
    responses((status = 200, description = "text/event-stream of audit records"))
)]
pub async fn stream_requests(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    require_role(&principal, Role::Viewer)?;
    let stream = BroadcastStream::new(state.audit.subscribe()).filter_map(|item| {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(error = %e, "log stream subscriber lagged");
                return None;
            }
        };
        let event = Event::default()
            .event("request")
            .id(record.seq.to_string())
            .json_data(AuditRecordResponse::from(record.as_ref()))
            .ok()?;
        Some(Ok(event))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEPALIVE_INTERVAL)))
}
