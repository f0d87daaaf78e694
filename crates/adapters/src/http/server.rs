use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use super::router::build_router;
use super::state::AppState;

/// Run the HTTP API on `bind_address:port` until `shutdown` resolves,
/// then drain in-flight connections.
///
/// Peer addresses are exposed to handlers; admission uses them.
pub async fn run_http_server(
    state: Arc<AppState>,
    bind_address: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{bind_address}:{port}")).await?;
    tracing::info!(%bind_address, port, "HTTP API server listening");

    let app = router.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
