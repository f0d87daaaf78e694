#![forbid(unsafe_code)]

pub mod admission_service;
pub mod allowlist_sync_service;
pub mod audit_trail_service;
pub mod change_history;
pub mod feature_flag_service;
pub mod intake_service;
pub mod mapper_service;
pub mod retry;
pub mod source_registry;
