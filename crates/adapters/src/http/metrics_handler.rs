use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::header;
use infrastructure::metrics::CounterSnapshot;
use serde::Serialize;
use utoipa::ToSchema;

use super::request_handler::SummaryResponse;
use super::state::AppState;

/// Content-Type for `OpenMetrics` text exposition format.
const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Serialize, ToSchema)]
pub struct MetricsResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub udp_packets_received_total: u64,
    pub records_parsed_total: u64,
    pub fifo_dropped_total: u64,
    /// source → reason → count.
    #[schema(value_type = Object)]
    pub blocked_source_total: BTreeMap<String, BTreeMap<String, u64>>,
    /// `None` when the dead-letter store cannot be read.
    pub dead_letters: Option<usize>,
    pub summary: SummaryResponse,
}

/// JSON counters combined with the recent request summary.
#[utoipa::path(
    get, path = "/metrics",
    tag = "Observability",
    responses((status = 200, description = "Counter snapshot", body = MetricsResponse))
)]
pub async fn metrics_json(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let CounterSnapshot {
        udp_packets_received_total,
        records_parsed_total,
        fifo_dropped_total,
        blocked_source_total,
    } = state.metrics.snapshot();
    let dead_letters = match state.dead_letters.count() {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(error = %e, "dead-letter count unavailable");
            None
        }
    };
    Json(MetricsResponse {
        version: state.version.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        udp_packets_received_total,
        records_parsed_total,
        fifo_dropped_total,
        blocked_source_total,
        dead_letters,
        summary: state
            .audit
            .summary(state.settings.summary_window_secs)
            .into(),
    })
}

/// Serves Prometheus metrics in `OpenMetrics` text format.
#[utoipa::path(
    get, path = "/metrics/prometheus",
    tag = "Observability",
    responses(
        (status = 200, description = "OpenMetrics text exposition", content_type = "application/openmetrics-text"),
    )
)]
pub async fn metrics_prometheus(
    State(state): State<Arc<AppState>>,
) -> ([(header::HeaderName, &'static str); 1], String) {
    let body = state.metrics.encode();
    ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body)
}
