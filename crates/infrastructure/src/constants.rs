use std::time::Duration;

// ── Network defaults ───────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/flowgate/config.yaml";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_UDP_PORT: u16 = 2055;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

// ── Request limits ─────────────────────────────────────────────────

/// Decompressed `/ingest` body cap.
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_RECORDS_PER_REQUEST: usize = 10_000;
/// Largest datagram the UDP listener will read.
pub const MAX_DATAGRAM_BYTES: usize = 65_535;

// ── Channel capacities ─────────────────────────────────────────────

pub const DEFAULT_FIFO_CAPACITY: usize = 4_096;
pub const MAPPER_INPUT_CHANNEL_CAPACITY: usize = 8_192;

// ── Mapper defaults ────────────────────────────────────────────────

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_RECORDS_PER_BATCH: usize = 10_000;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_GZIP_THRESHOLD_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_MIN_SPLIT_SIZE: usize = 1;

// ── Audit defaults ─────────────────────────────────────────────────

pub const DEFAULT_AUDIT_CAPACITY: usize = 1_000;
pub const DEFAULT_AUDIT_EXCLUDE_PATHS: &[&str] = &[
    "/healthz",
    "/metrics",
    "/admin/requests",
    "/logs/stream",
];
pub const DEFAULT_SUMMARY_WINDOW_SECS: u64 = 60;
/// Oldest dead letters are evicted past this count.
pub const DEAD_LETTER_MAX_ENTRIES: usize = 100_000;
/// Default page size for `GET /admin/dead-letters` and flag history.
pub const DEFAULT_LIST_LIMIT: usize = 100;

// ── Timeouts ───────────────────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const SSE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
