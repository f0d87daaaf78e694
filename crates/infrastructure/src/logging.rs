use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat, LogLevel};

/// Filter used when `RUST_LOG` is unset. Third-party HTTP internals are
/// held at `warn` so request-level logs stay readable at `debug`.
fn default_directives(level: LogLevel) -> String {
    format!("{level},hyper=warn,h2=warn,reqwest=warn")
}

/// Initialize structured logging to stdout.
///
/// - `LogFormat::Json`: flattened JSON for log shippers.
/// - `LogFormat::Text`: human-readable colored output.
///
/// `RUST_LOG` overrides `level` when set. Call once at startup; a second
/// call returns an error.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_target(true)
                    .with_ansi(false),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_ansi(true))
            .try_init(),
    };

    result.map_err(|e| ConfigError::Validation {
        field: "logging".to_string(),
        message: format!("subscriber already installed: {e}"),
    })
}
