pub mod auth_provider;
pub mod batch_transport;
pub mod change_log;
pub mod dead_letter_store;
pub mod enricher;
pub mod flow_sink;
pub mod metrics_port;
pub mod packet_filter;
pub mod source_repository;
