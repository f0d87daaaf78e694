#![forbid(unsafe_code)]

pub mod admission;
pub mod allowlist;
pub mod audit;
pub mod auth;
pub mod common;
pub mod export;
pub mod ingest;
pub mod source;
