use utoipa::OpenApi;

use super::admin_handler::{
    AllowlistStatusResponse, ChangeEntryResponse, DeadLetterListResponse, DeadLetterResponse,
    FlagPatchRequest, FlagsResponse, SyncReportResponse,
};
use super::error::{ErrorBody, ErrorDetail};
use super::health_handler::{ComponentHealth, HealthResponse};
use super::ingest_handler::IngestResponse;
use super::metrics_handler::MetricsResponse;
use super::request_handler::{
    AuditRecordResponse, RequestPageResponse, SummaryResponse, TimelineEventResponse,
};
use super::source_handler::{
    AdmissionTestRequest, AdmissionTestResponse, SourceListResponse, SourceRequest,
    SourceResponse,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "flowgate",
        description = "Flow telemetry ingestion gateway: admission, audit trail, allowlist sync"
    ),
    paths(
        super::health_handler::healthz,
        super::metrics_handler::metrics_json,
        super::metrics_handler::metrics_prometheus,
        super::ingest_handler::ingest,
        super::source_handler::list_sources,
        super::source_handler::get_source,
        super::source_handler::create_source,
        super::source_handler::update_source,
        super::source_handler::delete_source,
        super::source_handler::test_admission,
        super::admin_handler::get_flags,
        super::admin_handler::patch_flags,
        super::admin_handler::flag_history,
        super::admin_handler::allowlist_status,
        super::admin_handler::sync_allowlist,
        super::admin_handler::list_dead_letters,
        super::request_handler::list_requests,
        super::request_handler::request_summary,
        super::request_handler::stream_requests,
    ),
    components(schemas(
        ErrorBody,
        ErrorDetail,
        HealthResponse,
        ComponentHealth,
        MetricsResponse,
        IngestResponse,
        SourceRequest,
        SourceResponse,
        SourceListResponse,
        AdmissionTestRequest,
        AdmissionTestResponse,
        FlagsResponse,
        FlagPatchRequest,
        ChangeEntryResponse,
        SyncReportResponse,
        AllowlistStatusResponse,
        DeadLetterResponse,
        DeadLetterListResponse,
        AuditRecordResponse,
        TimelineEventResponse,
        RequestPageResponse,
        SummaryResponse,
    )),
    tags(
        (name = "Health"),
        (name = "Observability"),
        (name = "Ingest", description = "Flow record intake"),
        (name = "Sources", description = "Source registry"),
        (name = "Admin", description = "Runtime flags, allowlist and dead letters"),
        (name = "Requests", description = "Recent request audit trail"),
    )
)]
pub struct ApiDoc;
