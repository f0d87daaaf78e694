//! Downstream flow sinks.

pub mod http_sink;
pub mod log_sink;
