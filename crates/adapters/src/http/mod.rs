pub mod admin_handler;
pub mod error;
pub mod health_handler;
pub mod ingest_handler;
pub mod metrics_handler;
pub mod middleware;
pub mod openapi;
pub mod request_handler;
pub mod router;
pub mod server;
pub mod source_handler;
pub mod state;
