use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::common::network::IpNetwork;

use super::entity::Source;

/// Outcome of matching a client address against a source allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowlistMatch {
    Matched,
    NotMatched,
    /// The list is non-empty but no entry parsed as a CIDR.
    NoValidEntries,
}

/// A source with its allowlist parsed once at snapshot build time.
#[derive(Debug, Clone)]
pub struct CompiledSource {
    pub source: Source,
    pub networks: Vec<IpNetwork>,
    pub malformed: Vec<String>,
}

impl CompiledSource {
    pub fn compile(source: Source) -> Self {
        let (networks, malformed) = source.parse_allowed_ips();
        Self {
            source,
            networks,
            malformed,
        }
    }

    /// Empty lists match nothing. Malformed entries are skipped.
    pub fn match_ip(&self, ip: IpAddr) -> AllowlistMatch {
        if self.networks.iter().any(|net| net.contains(ip)) {
            return AllowlistMatch::Matched;
        }
        if self.networks.is_empty() && !self.malformed.is_empty() {
            AllowlistMatch::NoValidEntries
        } else {
            AllowlistMatch::NotMatched
        }
    }

    /// Longest prefix among networks containing `ip`.
    fn best_prefix(&self, ip: IpAddr) -> Option<u8> {
        self.networks
            .iter()
            .filter(|net| net.contains(ip))
            .map(IpNetwork::prefix_len)
            .max()
    }
}

/// Immutable view of the registry, swapped atomically on refresh.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    sources: HashMap<String, Arc<CompiledSource>>,
    version: u64,
}

impl SourceSnapshot {
    pub fn new(sources: Vec<Source>, version: u64) -> Self {
        let sources = sources
            .into_iter()
            .map(|s| (s.id.clone(), Arc::new(CompiledSource::compile(s))))
            .collect();
        Self { sources, version }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<CompiledSource>> {
        self.sources.get(id)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledSource>> {
        self.sources.values()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Arc<CompiledSource>> {
        self.sources.values().filter(|c| c.source.is_enabled())
    }

    /// Attribute an unauthenticated datagram to a source by peer address.
    ///
    /// Only enabled sources are candidates; the most specific prefix wins
    /// and ties break on source id so the result is stable.
    pub fn resolve_by_ip(&self, ip: IpAddr) -> Option<&Arc<CompiledSource>> {
        self.enabled()
            .filter_map(|c| c.best_prefix(ip).map(|p| (p, c)))
            .max_by(|(pa, a), (pb, b)| pa.cmp(pb).then_with(|| b.source.id.cmp(&a.source.id)))
            .map(|(_, c)| c)
    }

    /// Total malformed allowlist entries across all sources.
    pub fn malformed_count(&self) -> usize {
        self.sources.values().map(|c| c.malformed.len()).sum()
    }
}
