use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use domain::allowlist::entity::{AllowlistDelta, AllowlistSet};
use domain::allowlist::error::AllowlistError;
use domain::common::error::DomainError;
use domain::common::network::{IpNetwork, parse_cidr};
use infrastructure::config::AllowlistConfig;
use ports::secondary::packet_filter::PacketFilterPort;
use serde_json::Value;
use tokio::process::Command;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// nftables-backed allowlist.
///
/// Talks to the `nft` binary: reads the two named sets as JSON and
/// applies deltas with `add element` / `delete element`. Sets are never
/// flushed.
pub struct NftPacketFilter {
    config: AllowlistConfig,
}

impl NftPacketFilter {
    pub fn new(config: AllowlistConfig) -> Self {
        Self { config }
    }

    async fn run(&self, args: &[String]) -> Result<String, DomainError> {
        let mut cmd = Command::new(&self.config.nft_binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output())
            .await
            .map_err(|_| AllowlistError::Unavailable(format!("nft {} timed out", args.join(" "))))?
            .map_err(|e| AllowlistError::Unavailable(format!("spawn {}: {e}", self.config.nft_binary)))?;

        if !output.status.success() {
            return Err(AllowlistError::CommandFailed {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn list_set(&self, set: &str) -> Result<Vec<IpNetwork>, DomainError> {
        let args = list_set_args(&self.config, set);
        let stdout = self.run(&args).await?;
        parse_set_elements(&stdout)
    }
}

fn list_set_args(config: &AllowlistConfig, set: &str) -> Vec<String> {
    vec![
        "-j".to_string(),
        "list".to_string(),
        "set".to_string(),
        config.family.clone(),
        config.table.clone(),
        set.to_string(),
    ]
}

/// `nft <verb> element <family> <table> <set> { a, b }`, or `None` when
/// there is nothing to do.
fn element_args(
    config: &AllowlistConfig,
    verb: &str,
    set: &str,
    nets: &[IpNetwork],
) -> Option<Vec<String>> {
    if nets.is_empty() {
        return None;
    }
    let elements = nets
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Some(vec![
        verb.to_string(),
        "element".to_string(),
        config.family.clone(),
        config.table.clone(),
        set.to_string(),
        format!("{{ {elements} }}"),
    ])
}

/// Extract prefixes and single addresses from `nft -j list set` output.
/// Range elements have no CIDR form and are skipped.
fn parse_set_elements(json: &str) -> Result<Vec<IpNetwork>, DomainError> {
    let doc: Value = serde_json::from_str(json).map_err(|e| AllowlistError::Parse(e.to_string()))?;
    let Some(items) = doc.get("nftables").and_then(Value::as_array) else {
        return Err(AllowlistError::Parse("no 'nftables' array".to_string()).into());
    };

    let mut nets = Vec::new();
    for elem in items
        .iter()
        .filter_map(|item| item.get("set"))
        .filter_map(|set| set.get("elem").and_then(Value::as_array))
        .flatten()
    {
        // Elements with timeouts or comments are wrapped as {"elem": {"val": ...}}.
        let value = elem
            .get("elem")
            .and_then(|e| e.get("val"))
            .unwrap_or(elem);
        match element_to_network(value) {
            Some(net) => nets.push(net),
            None => tracing::debug!(element = %value, "skipping non-CIDR nft set element"),
        }
    }
    Ok(nets)
}

fn element_to_network(value: &Value) -> Option<IpNetwork> {
    if let Some(addr) = value.as_str() {
        return parse_cidr(addr).ok();
    }
    let prefix = value.get("prefix")?;
    let addr = prefix.get("addr")?.as_str()?;
    let len = prefix.get("len")?.as_u64()?;
    parse_cidr(&format!("{addr}/{len}")).ok()
}

impl PacketFilterPort for NftPacketFilter {
    fn available(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            if !self.config.enabled {
                return false;
            }
            self.run(&["--version".to_string()]).await.is_ok()
        })
    }

    fn current_set(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<AllowlistSet, DomainError>> + Send + '_>> {
        Box::pin(async move {
            let mut set = AllowlistSet::default();
            for name in [&self.config.set_v4, &self.config.set_v6] {
                for net in self.list_set(name).await? {
                    set.insert(net);
                }
            }
            Ok(set)
        })
    }

    fn apply<'a>(
        &'a self,
        delta: &'a AllowlistDelta,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>> {
        Box::pin(async move {
            let steps = [
                ("add", &self.config.set_v4, &delta.add_v4),
                ("add", &self.config.set_v6, &delta.add_v6),
                ("delete", &self.config.set_v4, &delta.remove_v4),
                ("delete", &self.config.set_v6, &delta.remove_v6),
            ];
            for (verb, set, nets) in steps {
                if let Some(args) = element_args(&self.config, verb, set, nets) {
                    self.run(&args).await?;
                    tracing::debug!(verb, set = %set, count = nets.len(), "nft set updated");
                }
            }
            Ok(())
        })
    }
}
