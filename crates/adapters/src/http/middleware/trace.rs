use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use application::audit_trail_service::RequestTrace;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use super::super::state::AppState;
use crate::transport::http_batch_transport::TRACE_ID_HEADER;

const MAX_TRACE_ID_LEN: usize = 128;

/// Peer address of the request, as seen by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

/// Outermost middleware: assigns the trace id, exposes the request
/// timeline to handlers, and on completion hands the finished record to
/// the audit trail.
///
/// A well-formed incoming `X-Trace-Id` is adopted so mapper batches and
/// audit records correlate; otherwise a fresh UUID is generated. The id
/// is always echoed on the response.
pub async fn trace_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| is_valid_trace_id(id))
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |info| info.0.ip());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let trace = Arc::new(RequestTrace::new(trace_id.clone()));
    request.extensions_mut().insert(Arc::clone(&trace));
    request.extensions_mut().insert(ClientAddr(client_ip));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }

    if !state.audit.is_excluded(&path) {
        let record = trace.finish(
            &method,
            &path,
            &client_ip.to_string(),
            response.status().as_u16(),
        );
        state.audit.offer(record);
    }
    response
}

fn is_valid_trace_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_TRACE_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}
