use std::sync::Arc;
use std::time::Instant;

use application::admission_service::AdmissionService;
use application::allowlist_sync_service::AllowlistSyncService;
use application::audit_trail_service::AuditTrailService;
use application::feature_flag_service::FeatureFlagService;
use application::intake_service::IntakeService;
use application::source_registry::SourceRegistry;
use infrastructure::constants::{DEFAULT_BODY_LIMIT_BYTES, DEFAULT_SUMMARY_WINDOW_SECS};
use infrastructure::metrics::GatewayMetrics;
use ports::secondary::auth_provider::AuthProvider;
use ports::secondary::dead_letter_store::DeadLetterStore;

/// Request-independent API tunables.
#[derive(Debug, Clone, Copy)]
pub struct ApiSettings {
    /// Decompressed `/ingest` body cap.
    pub body_limit: usize,
    /// Applied to created sources that omit `max_eps`.
    pub default_max_eps: u64,
    pub summary_window_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            body_limit: DEFAULT_BODY_LIMIT_BYTES,
            default_max_eps: 0,
            summary_window_secs: DEFAULT_SUMMARY_WINDOW_SECS,
        }
    }
}

/// Shared application state for the REST API server.
///
/// Passed to Axum handlers via `State(Arc<AppState>)`.
pub struct AppState {
    pub metrics: Arc<GatewayMetrics>,
    pub start_time: Instant,
    pub version: &'static str,
    pub registry: Arc<SourceRegistry>,
    pub admission: Arc<AdmissionService>,
    pub intake: Arc<IntakeService>,
    pub flags: Arc<FeatureFlagService>,
    pub allowlist: Arc<AllowlistSyncService>,
    pub audit: Arc<AuditTrailService>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub auth_provider: Option<Arc<dyn AuthProvider>>,
    pub settings: ApiSettings,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metrics: Arc<GatewayMetrics>,
        registry: Arc<SourceRegistry>,
        admission: Arc<AdmissionService>,
        intake: Arc<IntakeService>,
        flags: Arc<FeatureFlagService>,
        allowlist: Arc<AllowlistSyncService>,
        audit: Arc<AuditTrailService>,
        dead_letters: Arc<dyn DeadLetterStore>,
    ) -> Self {
        Self {
            metrics,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
            registry,
            admission,
            intake,
            flags,
            allowlist,
            audit,
            dead_letters,
            auth_provider: None,
            settings: ApiSettings::default(),
        }
    }

    /// Require API keys on every non-public route.
    #[must_use]
    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ApiSettings) -> Self {
        self.settings = settings;
        self
    }
}
