use std::sync::Arc;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use domain::admission::flags::{FeatureFlags, FlagPatch};
use domain::allowlist::entity::{AllowlistStatus, SyncReport};
use domain::audit::change::{ChangeActor, ChangeEntry};
use domain::auth::entity::Principal;
use domain::auth::rbac::Role;
use domain::ingest::entity::DeadLetter;
use infrastructure::constants::DEFAULT_LIST_LIMIT;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::error::{ApiError, ErrorBody};
use super::middleware::rbac::require_role;
use super::state::AppState;

const MAX_LIST_LIMIT: usize = 1_000;

// ── Request / Response DTOs ─────────────────────────────────────────

#[derive(Serialize, ToSchema)]
pub struct FlagsResponse {
    pub http_enabled: bool,
    pub udp_enabled: bool,
    pub log_only: bool,
    pub fail_open: bool,
}

/// Absent fields keep their current value.
#[derive(Deserialize, ToSchema)]
pub struct FlagPatchRequest {
    pub http_enabled: Option<bool>,
    pub udp_enabled: Option<bool>,
    pub log_only: Option<bool>,
    pub fail_open: Option<bool>,
}

#[derive(Serialize, ToSchema)]
pub struct ChangeEntryResponse {
    pub timestamp_ms: u64,
    pub actor: String,
    pub action: String,
    pub target: String,
    #[schema(value_type = Object)]
    pub before: serde_json::Value,
    #[schema(value_type = Object)]
    pub after: serde_json::Value,
}

#[derive(Serialize, ToSchema)]
pub struct SyncReportResponse {
    /// `applied`, `unchanged`, `dry_run`, `unavailable`, or `failed`.
    pub status: String,
    pub ipv4_added: usize,
    pub ipv6_added: usize,
    pub ipv4_removed: usize,
    pub ipv6_removed: usize,
    pub total_sources: usize,
    pub message: String,
    pub dry_run: bool,
    pub timestamp_ms: u64,
}

#[derive(Serialize, ToSchema)]
pub struct AllowlistStatusResponse {
    pub available: bool,
    pub udp_port: u16,
    pub sync_needed: bool,
    pub desired_v4: usize,
    pub desired_v6: usize,
    pub current_v4: Option<usize>,
    pub current_v6: Option<usize>,
    pub last_sync: Option<SyncReportResponse>,
}

#[derive(Serialize, ToSchema)]
pub struct DeadLetterResponse {
    pub timestamp_ms: u64,
    pub origin: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub record_count: usize,
    /// Original JSON payload, kept for replay.
    pub payload: String,
}

#[derive(Serialize, ToSchema)]
pub struct DeadLetterListResponse {
    pub total: usize,
    pub letters: Vec<DeadLetterResponse>,
}

#[derive(Deserialize, IntoParams)]
pub struct LimitParams {
    /// Defaults to 100, capped at 1000.
    pub limit: Option<usize>,
}

impl LimitParams {
    fn resolve(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

#[derive(Deserialize, IntoParams)]
pub struct SyncParams {
    /// Compute the delta without touching the packet filter.
    #[serde(default)]
    pub dry_run: bool,
}

// ── Conversion helpers ──────────────────────────────────────────────

impl From<FeatureFlags> for FlagsResponse {
    fn from(f: FeatureFlags) -> Self {
        Self {
            http_enabled: f.http_enabled,
            udp_enabled: f.udp_enabled,
            log_only: f.log_only,
            fail_open: f.fail_open,
        }
    }
}

impl From<FlagPatchRequest> for FlagPatch {
    fn from(p: FlagPatchRequest) -> Self {
        Self {
            http_enabled: p.http_enabled,
            udp_enabled: p.udp_enabled,
            log_only: p.log_only,
            fail_open: p.fail_open,
        }
    }
}

impl From<ChangeEntry> for ChangeEntryResponse {
    fn from(e: ChangeEntry) -> Self {
        Self {
            timestamp_ms: e.timestamp_ms,
            actor: e.actor.to_string(),
            action: e.action,
            target: e.target,
            before: e.before,
            after: e.after,
        }
    }
}

impl From<SyncReport> for SyncReportResponse {
    fn from(r: SyncReport) -> Self {
        Self {
            status: r.status.as_str().to_string(),
            ipv4_added: r.ipv4_added,
            ipv6_added: r.ipv6_added,
            ipv4_removed: r.ipv4_removed,
            ipv6_removed: r.ipv6_removed,
            total_sources: r.total_sources,
            message: r.message,
            dry_run: r.dry_run,
            timestamp_ms: r.timestamp_ms,
        }
    }
}

impl From<AllowlistStatus> for AllowlistStatusResponse {
    fn from(s: AllowlistStatus) -> Self {
        Self {
            available: s.available,
            udp_port: s.udp_port,
            sync_needed: s.sync_needed,
            desired_v4: s.desired_v4,
            desired_v6: s.desired_v6,
            current_v4: s.current_v4,
            current_v6: s.current_v6,
            last_sync: s.last_sync.map(Into::into),
        }
    }
}

impl From<DeadLetter> for DeadLetterResponse {
    fn from(l: DeadLetter) -> Self {
        Self {
            timestamp_ms: l.timestamp_ms,
            origin: l.origin,
            reason: l.reason,
            trace_id: l.trace_id,
            record_count: l.record_count,
            payload: l.payload,
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

/// `GET /admin/featureflags`
#[utoipa::path(
    get, path = "/admin/featureflags",
    tag = "Admin",
    responses((status = 200, description = "Current flags", body = FlagsResponse))
)]
pub async fn get_flags(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<FlagsResponse>, ApiError> {
    require_role(&principal, Role::Admin)?;
    Ok(Json(state.flags.get().into()))
}

/// `PATCH /admin/featureflags`: applied atomically and recorded.
#[utoipa::path(
    patch, path = "/admin/featureflags",
    tag = "Admin",
    request_body = FlagPatchRequest,
    responses(
        (status = 200, description = "Flags after the patch", body = FlagsResponse),
        (status = 400, description = "Empty patch", body = ErrorBody),
    )
)]
pub async fn patch_flags(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<FlagPatchRequest>,
) -> Result<Json<FlagsResponse>, ApiError> {
    require_role(&principal, Role::Admin)?;
    let patch = FlagPatch::from(body);
    let after = state
        .flags
        .update(&patch, ChangeActor::Api(principal.name.clone()))?;
    Ok(Json(after.into()))
}

/// `GET /admin/featureflags/history`: newest first.
#[utoipa::path(
    get, path = "/admin/featureflags/history",
    tag = "Admin",
    params(LimitParams),
    responses((status = 200, description = "Flag changes", body = Vec<ChangeEntryResponse>))
)]
pub async fn flag_history(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<ChangeEntryResponse>>, ApiError> {
    require_role(&principal, Role::Admin)?;
    let entries = state
        .flags
        .history(params.resolve())
        .into_iter()
        .map(ChangeEntryResponse::from)
        .collect();
    Ok(Json(entries))
}

/// `GET /admin/security/allowlist/status`
#[utoipa::path(
    get, path = "/admin/security/allowlist/status",
    tag = "Admin",
    responses((status = 200, description = "Kernel allowlist state", body = AllowlistStatusResponse))
)]
pub async fn allowlist_status(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<AllowlistStatusResponse>, ApiError> {
    require_role(&principal, Role::Admin)?;
    Ok(Json(state.allowlist.status().await.into()))
}

/// `POST /admin/security/sync-allowlist`
#[utoipa::path(
    post, path = "/admin/security/sync-allowlist",
    tag = "Admin",
    params(SyncParams),
    responses(
        (status = 200, description = "Sync report", body = SyncReportResponse),
        (status = 409, description = "A sync is already running", body = ErrorBody),
    )
)]
pub async fn sync_allowlist(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncReportResponse>, ApiError> {
    require_role(&principal, Role::Admin)?;
    tracing::info!(actor = %principal.name, dry_run = params.dry_run, "allowlist sync requested");
    let report = state.allowlist.sync(params.dry_run).await?;
    Ok(Json(report.into()))
}

/// `GET /admin/dead-letters`: newest first.
#[utoipa::path(
    get, path = "/admin/dead-letters",
    tag = "Admin",
    params(LimitParams),
    responses(
        (status = 200, description = "Stored dead letters", body = DeadLetterListResponse),
        (status = 503, description = "Store unreadable", body = ErrorBody),
    )
)]
pub async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<LimitParams>,
) -> Result<Json<DeadLetterListResponse>, ApiError> {
    require_role(&principal, Role::Admin)?;
    let total = state.dead_letters.count()?;
    let letters = state
        .dead_letters
        .list(params.resolve())?
        .into_iter()
        .map(DeadLetterResponse::from)
        .collect();
    Ok(Json(DeadLetterListResponse { total, letters }))
}
