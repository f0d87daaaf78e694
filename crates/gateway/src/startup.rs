use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use adapters::auth::api_key_provider::ApiKeyAuthProvider;
use adapters::enrich::cidr_enricher::StaticCidrEnricher;
use adapters::http::server::run_http_server;
use adapters::http::state::{ApiSettings, AppState};
use adapters::packet_filter::nft::NftPacketFilter;
use adapters::sink::http_sink::HttpSink;
use adapters::sink::log_sink::LogSink;
use adapters::storage::open_database;
use adapters::storage::redb_change_log::RedbChangeLog;
use adapters::storage::redb_dead_letter_store::RedbDeadLetterStore;
use adapters::storage::redb_source_repository::RedbSourceRepository;
use adapters::udp::forwarder::UdpForwarder;
use adapters::udp::listener::UdpListener;
use anyhow::{Context, Result};
use application::admission_service::AdmissionService;
use application::allowlist_sync_service::AllowlistSyncService;
use application::audit_trail_service::AuditTrailService;
use application::change_history::ChangeHistory;
use application::feature_flag_service::FeatureFlagService;
use application::intake_service::IntakeService;
use application::source_registry::{RegistrySettings, SourceRegistry};
use domain::audit::change::ChangeActor;
use domain::common::error::DomainError;
use infrastructure::config::{GatewayConfig, SinkConfig};
use infrastructure::constants::{
    DEAD_LETTER_MAX_ENTRIES, DEFAULT_CONFIG_PATH, GRACEFUL_SHUTDOWN_TIMEOUT,
};
use infrastructure::logging::init_logging;
use infrastructure::metrics::GatewayMetrics;
use ports::secondary::dead_letter_store::DeadLetterStore;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

use crate::cli::Cli;
use crate::shutdown::create_shutdown_token;

/// Load the config file. A missing file at the default path falls back
/// to defaults plus the environment; an explicit path must exist.
pub fn load_config(path: &str) -> Result<GatewayConfig> {
    let config_path = Path::new(path);
    if !config_path.exists() && path == DEFAULT_CONFIG_PATH {
        return GatewayConfig::from_env().context("failed to build config from environment");
    }
    GatewayConfig::load(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))
}

/// Load config, apply CLI overrides and initialize logging.
pub fn bootstrap(cli: &Cli) -> Result<GatewayConfig> {
    let config = load_config(&cli.config)?;
    let level = cli.log_level.unwrap_or(config.logging.level);
    let format = cli.log_format.unwrap_or(config.logging.format);
    init_logging(level, format).context("failed to initialize logging")?;
    Ok(config)
}

/// `None` keeps the database in memory.
pub fn storage_path(config: &GatewayConfig) -> Option<PathBuf> {
    let path = config.registry.storage_path.trim();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Run the gateway until a shutdown signal arrives.
pub async fn run(cli: &Cli) -> Result<()> {
    // ── 1. Config and logging ───────────────────────────────────────
    let config = bootstrap(cli)?;

    let root_span = tracing::span!(
        Level::INFO,
        "service",
        service.name = "flowgate",
        service.version = env!("CARGO_PKG_VERSION"),
    );
    let _root_guard = root_span.enter();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config,
        http_port = config.server.http_port,
        udp_enabled = config.server.udp_enabled,
        "flowgate starting"
    );

    let cancel = create_shutdown_token();
    let metrics = Arc::new(GatewayMetrics::new());
    let metrics_port: Arc<dyn MetricsPort> = Arc::clone(&metrics) as Arc<dyn MetricsPort>;

    // ── 2. Storage ──────────────────────────────────────────────────
    let db_path = storage_path(&config);
    let db = open_database(db_path.as_deref()).context("failed to open database")?;
    match db_path {
        Some(ref path) => info!(path = %path.display(), "database opened"),
        None => warn!("storage_path is empty, state is kept in memory only"),
    }
    let repo = Arc::new(RedbSourceRepository::open(Arc::clone(&db))?);
    let change_log = Arc::new(RedbChangeLog::open(Arc::clone(&db))?);
    let dead_letters: Arc<dyn DeadLetterStore> =
        Arc::new(RedbDeadLetterStore::open(Arc::clone(&db), DEAD_LETTER_MAX_ENTRIES)?);

    // ── 3. Source registry ──────────────────────────────────────────
    let history = Arc::new(ChangeHistory::default().with_sink(change_log));
    let registry = Arc::new(SourceRegistry::new(
        repo,
        RegistrySettings {
            strict_cidr: config.admission.strict_cidr,
            refresh_interval: config.registry.refresh_interval(),
            degraded_after: config.registry.degraded_after(),
            stale_after: config.registry.stale_after(),
        },
        Arc::clone(&history),
    ));
    registry.refresh().context("initial registry load failed")?;
    seed_sources(&registry, &config)?;

    // ── 4. Admission and intake ─────────────────────────────────────
    let flags = Arc::new(FeatureFlagService::new(
        config.admission.flags(),
        Arc::clone(&history),
    ));
    let admission = Arc::new(AdmissionService::new(
        Arc::clone(&registry),
        Arc::clone(&flags),
        Arc::clone(&metrics_port),
    ));
    let intake = Arc::new(build_intake(
        &config,
        Arc::clone(&admission),
        Arc::clone(&dead_letters),
        Arc::clone(&metrics_port),
        cancel.clone(),
    )?);
    info!(sinks = ?intake.sink_names(), "intake pipeline ready");

    // ── 5. Allowlist sync ───────────────────────────────────────────
    let filter = Arc::new(NftPacketFilter::new(config.allowlist.clone()));
    let allowlist = Arc::new(AllowlistSyncService::new(
        Arc::clone(&registry),
        filter,
        Arc::clone(&metrics_port),
        config.server.udp_port,
    ));
    if config.allowlist.enabled && config.allowlist.sync_on_start {
        match allowlist.sync(false).await {
            Ok(report) => info!(status = report.status.as_str(), "startup allowlist sync"),
            Err(e) => warn!(error = %e, "startup allowlist sync skipped"),
        }
    }

    // ── 6. Audit trail and API state ────────────────────────────────
    let audit = Arc::new(AuditTrailService::new(
        config.audit.capacity,
        config.audit.sampler(),
    ));

    let mut state = AppState::new(
        Arc::clone(&metrics),
        Arc::clone(&registry),
        Arc::clone(&admission),
        intake,
        flags,
        allowlist,
        audit,
        dead_letters,
    )
    .with_settings(ApiSettings {
        body_limit: config.server.body_limit_bytes,
        default_max_eps: config.admission.default_max_eps,
        summary_window_secs: config.audit.summary_window_secs,
    });
    if config.auth.enabled {
        let provider = ApiKeyAuthProvider::from_config(&config.auth.api_keys);
        info!(keys = provider.key_count(), "API key authentication enabled");
        state = state.with_auth_provider(Arc::new(provider));
    } else {
        warn!("authentication disabled, every request runs as admin");
    }
    let state = Arc::new(state);

    // ── 7. Background tasks ─────────────────────────────────────────
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    tasks.push(tokio::spawn(
        Arc::clone(&registry).run_refresh_loop(cancel.clone()),
    ));

    if config.server.udp_enabled {
        tasks.extend(start_udp(&config, admission, metrics_port, &cancel).await?);
    }

    // ── 8. HTTP API ─────────────────────────────────────────────────
    let server_result = run_http_server(
        state,
        &config.server.bind_address,
        config.server.http_port,
        cancel.clone().cancelled_owned(),
    )
    .await;

    // ── 9. Shutdown ─────────────────────────────────────────────────
    cancel.cancel();
    let drain = async {
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
    };
    if tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, drain)
        .await
        .is_err()
    {
        warn!("background tasks did not stop in time");
    }

    server_result?;
    info!("flowgate stopped");
    Ok(())
}

/// Insert config-declared sources the store does not know yet. Sources
/// already present keep their stored (possibly API-edited) state.
fn seed_sources(registry: &SourceRegistry, config: &GatewayConfig) -> Result<()> {
    let mut seeded = 0usize;
    for source in &config.registry.sources {
        match registry.get(&source.id) {
            Ok(_) => continue,
            Err(DomainError::NotFound(_)) => {}
            Err(e) => return Err(e).context("registry lookup failed"),
        }
        registry
            .create(source.clone(), ChangeActor::Config)
            .with_context(|| format!("failed to seed source '{}'", source.id))?;
        seeded += 1;
    }
    if seeded > 0 {
        info!(seeded, total = registry.list().len(), "seeded sources from config");
    }
    Ok(())
}

fn build_intake(
    config: &GatewayConfig,
    admission: Arc<AdmissionService>,
    dead_letters: Arc<dyn DeadLetterStore>,
    metrics: Arc<dyn MetricsPort>,
    cancel: CancellationToken,
) -> Result<IntakeService> {
    let mut intake = IntakeService::new(
        admission,
        dead_letters,
        metrics,
        config.server.max_records_per_request,
    );

    if config.sinks.is_empty() {
        intake = intake.with_sink(Arc::new(LogSink::new("log")));
    }
    for sink in &config.sinks {
        intake = match sink {
            SinkConfig::Http(http) => intake.with_sink(Arc::new(
                HttpSink::new(http, cancel.clone())
                    .with_context(|| format!("invalid sink '{}'", http.name))?,
            )),
            SinkConfig::Log(log) => intake.with_sink(Arc::new(LogSink::new(log.name.clone()))),
        };
    }

    if config.enrichment.enabled {
        let enricher = StaticCidrEnricher::from_config(&config.enrichment.cidr_tags)
            .context("invalid enrichment table")?;
        info!(entries = enricher.len(), "CIDR enrichment enabled");
        intake = intake.with_enricher(Arc::new(enricher));
    }
    Ok(intake)
}

/// Bind the UDP listener and spawn it with the forwarder that drains
/// its FIFO.
async fn start_udp(
    config: &GatewayConfig,
    admission: Arc<AdmissionService>,
    metrics: Arc<dyn MetricsPort>,
    cancel: &CancellationToken,
) -> Result<Vec<JoinHandle<()>>> {
    let bind: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.udp_port)
        .parse()
        .context("invalid UDP bind address")?;
    let listener = UdpListener::bind(bind, admission, metrics)
        .await
        .with_context(|| format!("failed to bind UDP {bind}"))?;

    let target = match config.server.udp_forward_to.as_deref() {
        Some(target) => Some(
            tokio::net::lookup_host(target)
                .await
                .with_context(|| format!("failed to resolve {target}"))?
                .next()
                .with_context(|| format!("{target} resolved to no address"))?,
        ),
        None => None,
    };
    if target.is_none() {
        warn!("udp_forward_to not set, admitted datagrams are discarded");
    }
    let forwarder = UdpForwarder::new(target)
        .await
        .context("failed to open UDP forward socket")?;

    let (tx, rx) = mpsc::channel(config.server.fifo_capacity);
    let listener_cancel = cancel.clone();
    let forwarder_cancel = cancel.clone();
    Ok(vec![
        tokio::spawn(async move { listener.run(tx, listener_cancel).await }),
        tokio::spawn(async move {
            forwarder.run(rx, forwarder_cancel).await;
        }),
    ])
}
