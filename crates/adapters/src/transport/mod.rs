//! Mapper-to-gateway delivery.

pub mod http_batch_transport;
