use std::path::PathBuf;

use clap::{Parser, Subcommand};
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "flowgate",
    about = "Network telemetry ingestion gateway",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file. When the default path is
    /// missing, defaults plus environment variables are used.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "FLOWGATE_CONFIG", global = true)]
    pub config: String,

    /// Log level override (takes precedence over config file)
    #[arg(short, long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log format: json (default, production) or text (development)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the gateway (default when no subcommand is given)
    Serve,

    /// Batch line-delimited JSON records and deliver them to a gateway
    Map(MapArgs),

    /// Load and validate the configuration, then print it with secrets masked
    CheckConfig,

    /// Display version information
    Version,
}

#[derive(clap::Args, Debug)]
pub struct MapArgs {
    /// Input file; `-` or absent reads stdin
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Gateway `/ingest` URL (overrides `mapper.gateway_url`)
    #[arg(long, env = "MAPPER_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// Collector id sent with every batch (overrides `mapper.collector_id`)
    #[arg(long, env = "MAPPER_COLLECTOR_ID")]
    pub collector_id: Option<String>,
}

pub fn parse() -> Cli {
    Cli::parse()
}
