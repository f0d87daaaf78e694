pub mod backoff;
pub mod batcher;
pub mod entity;
pub mod error;
pub mod mapper;
pub mod payload;
