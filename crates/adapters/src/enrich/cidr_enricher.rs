use std::collections::BTreeMap;
use std::net::IpAddr;

use domain::common::network::IpNetwork;
use domain::ingest::entity::CanonicalFlow;
use infrastructure::config::{CidrTagConfig, ConfigError, validate_cidr};
use ports::secondary::enricher::Enricher;
use serde_json::Value;

#[derive(Debug, Clone)]
struct TagEntry {
    network: IpNetwork,
    tags: BTreeMap<String, String>,
}

/// Tags flows from a static CIDR table.
///
/// Source and destination addresses are looked up independently; the
/// most specific matching prefix wins. Tags land in `annotations` as
/// `src.<tag>` and `dst.<tag>`.
#[derive(Debug, Clone)]
pub struct StaticCidrEnricher {
    /// Sorted by descending prefix length so the first hit is the most
    /// specific.
    entries: Vec<TagEntry>,
}

impl StaticCidrEnricher {
    pub fn from_config(table: &[CidrTagConfig]) -> Result<Self, ConfigError> {
        let mut entries = table
            .iter()
            .map(|entry| {
                Ok(TagEntry {
                    network: validate_cidr(&entry.cidr)?,
                    tags: entry.tags.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        entries.sort_by(|a, b| b.network.prefix_len().cmp(&a.network.prefix_len()));
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, addr: &str) -> Option<&BTreeMap<String, String>> {
        let ip: IpAddr = addr.parse().ok()?;
        self.entries
            .iter()
            .find(|e| e.network.contains(ip))
            .map(|e| &e.tags)
    }
}

impl Enricher for StaticCidrEnricher {
    fn name(&self) -> &str {
        "static_cidr"
    }

    fn enrich(&self, flow: &mut CanonicalFlow) -> usize {
        let mut added = 0;
        for (side, addr) in [("src", flow.src_addr.clone()), ("dst", flow.dst_addr.clone())] {
            if let Some(tags) = self.lookup(&addr) {
                for (key, value) in tags {
                    flow.annotations
                        .insert(format!("{side}.{key}"), Value::from(value.as_str()));
                    added += 1;
                }
            }
        }
        added
    }
}
