use std::sync::Arc;

use adapters::storage::open_database;
use adapters::storage::redb_dead_letter_store::RedbDeadLetterStore;
use adapters::transport::http_batch_transport::HttpBatchTransport;
use anyhow::{Context, Result};
use application::mapper_service::{MapperService, MapperSettings};
use infrastructure::constants::{DEAD_LETTER_MAX_ENTRIES, MAPPER_INPUT_CHANNEL_CAPACITY};
use infrastructure::metrics::GatewayMetrics;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::{Cli, MapArgs};
use crate::shutdown::create_shutdown_token;
use crate::startup::{bootstrap, storage_path};

/// Read line-delimited JSON records, batch them and deliver them to the
/// gateway. Prints the run report as JSON on stdout.
pub async fn run(cli: &Cli, args: &MapArgs) -> Result<()> {
    let mut config = bootstrap(cli)?;
    if let Some(ref url) = args.gateway_url {
        config.mapper.gateway_url.clone_from(url);
    }
    if let Some(ref id) = args.collector_id {
        config.mapper.collector_id.clone_from(id);
    }
    let mapper_cfg = &config.mapper;

    let db_path = storage_path(&config);
    let db = open_database(db_path.as_deref()).context("failed to open dead-letter store")?;
    let dead_letters = Arc::new(RedbDeadLetterStore::open(db, DEAD_LETTER_MAX_ENTRIES)?);
    let transport =
        Arc::new(HttpBatchTransport::new(mapper_cfg).context("failed to build HTTP transport")?);

    let mapper = MapperService::new(
        transport,
        dead_letters,
        Arc::new(GatewayMetrics::new()),
        MapperSettings {
            collector_id: mapper_cfg.collector_id.clone(),
            input_format: mapper_cfg.input_format,
            batch: mapper_cfg.batch_policy(),
            limits: mapper_cfg.payload_limits(),
            backoff: mapper_cfg.backoff_policy(),
            min_split_size: mapper_cfg.min_split_size,
        },
    );
    info!(
        gateway_url = %mapper_cfg.gateway_url,
        collector_id = %mapper_cfg.collector_id,
        "mapper starting"
    );

    let cancel = create_shutdown_token();
    let (tx, rx) = mpsc::channel(MAPPER_INPUT_CHANNEL_CAPACITY);
    let input = args.input.clone();
    let reader = tokio::spawn(async move {
        match input {
            Some(path) if path.as_os_str() != "-" => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?;
                feed_records(BufReader::new(file), tx).await
            }
            _ => feed_records(BufReader::new(tokio::io::stdin()), tx).await,
        }
    });

    let mut report = mapper.run(rx, cancel).await;
    report.invalid += reader.await.context("input reader panicked")??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Push each non-blank line as a JSON value. Lines that are not JSON are
/// skipped; their count is returned. Stops early if the mapper is gone.
async fn feed_records<R>(reader: R, tx: mpsc::Sender<Value>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut unparsable = 0usize;
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => {
                if tx.send(value).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                unparsable += 1;
                warn!(line = line_no, error = %e, "skipping malformed input line");
            }
        }
    }
    Ok(unparsable)
}
