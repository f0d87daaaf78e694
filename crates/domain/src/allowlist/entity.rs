use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::common::network::IpNetwork;
use crate::source::snapshot::SourceSnapshot;

/// Admissible networks split by address family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistSet {
    pub v4: BTreeSet<IpNetwork>,
    pub v6: BTreeSet<IpNetwork>,
}

impl AllowlistSet {
    pub fn insert(&mut self, net: IpNetwork) {
        if net.is_v6() {
            self.v6.insert(net);
        } else {
            self.v4.insert(net);
        }
    }

    /// Union of every valid CIDR of every enabled source, reduced to the
    /// smallest set of networks covering the same addresses.
    pub fn desired_from(snapshot: &SourceSnapshot) -> Self {
        let mut set = Self::default();
        for compiled in snapshot.enabled() {
            for net in &compiled.networks {
                set.insert(*net);
            }
        }
        set.collapse();
        set
    }

    /// Drop networks contained in another and merge sibling halves into
    /// their parent until nothing changes. The packet filter rejects
    /// overlapping interval elements.
    pub fn collapse(&mut self) {
        collapse_family(&mut self.v4);
        collapse_family(&mut self.v6);
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// What to add and remove to turn `current` into `self`.
    pub fn diff(&self, current: &Self) -> AllowlistDelta {
        AllowlistDelta {
            add_v4: self.v4.difference(&current.v4).copied().collect(),
            add_v6: self.v6.difference(&current.v6).copied().collect(),
            remove_v4: current.v4.difference(&self.v4).copied().collect(),
            remove_v6: current.v6.difference(&self.v6).copied().collect(),
        }
    }
}

fn collapse_family(nets: &mut BTreeSet<IpNetwork>) {
    loop {
        // Sorted by address then prefix, so a covering network always
        // precedes what it covers.
        let mut kept: Vec<IpNetwork> = Vec::with_capacity(nets.len());
        for net in nets.iter() {
            if kept.last().is_some_and(|last| last.covers(net)) {
                continue;
            }
            kept.push(*net);
        }

        let mut merged = BTreeSet::new();
        let mut changed = false;
        let mut i = 0;
        while i < kept.len() {
            if let Some(next) = kept.get(i + 1)
                && kept[i].sibling() == Some(*next)
                && let Some(parent) = kept[i].parent()
            {
                merged.insert(parent);
                changed = true;
                i += 2;
            } else {
                merged.insert(kept[i]);
                i += 1;
            }
        }
        *nets = merged;
        if !changed {
            break;
        }
    }
}

impl FromIterator<IpNetwork> for AllowlistSet {
    fn from_iter<I: IntoIterator<Item = IpNetwork>>(iter: I) -> Self {
        let mut set = Self::default();
        for net in iter {
            set.insert(net);
        }
        set
    }
}

/// Incremental change to the packet filter. Applied as adds before
/// removes so the filter is never transiently empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistDelta {
    pub add_v4: Vec<IpNetwork>,
    pub add_v6: Vec<IpNetwork>,
    pub remove_v4: Vec<IpNetwork>,
    pub remove_v6: Vec<IpNetwork>,
}

impl AllowlistDelta {
    pub fn is_empty(&self) -> bool {
        self.add_v4.is_empty()
            && self.add_v6.is_empty()
            && self.remove_v4.is_empty()
            && self.remove_v6.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Applied,
    Unchanged,
    DryRun,
    Unavailable,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::DryRun => "dry_run",
            Self::Unavailable => "unavailable",
            Self::Failed => "failed",
        }
    }
}

/// Result of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub ipv4_added: usize,
    pub ipv6_added: usize,
    pub ipv4_removed: usize,
    pub ipv6_removed: usize,
    pub total_sources: usize,
    pub status: SyncStatus,
    pub message: String,
    pub dry_run: bool,
    pub timestamp_ms: u64,
}

impl SyncReport {
    pub fn from_delta(
        delta: &AllowlistDelta,
        total_sources: usize,
        status: SyncStatus,
        message: impl Into<String>,
        dry_run: bool,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            ipv4_added: delta.add_v4.len(),
            ipv6_added: delta.add_v6.len(),
            ipv4_removed: delta.remove_v4.len(),
            ipv6_removed: delta.remove_v6.len(),
            total_sources,
            status,
            message: message.into(),
            dry_run,
            timestamp_ms,
        }
    }

    pub fn empty(
        total_sources: usize,
        status: SyncStatus,
        message: impl Into<String>,
        dry_run: bool,
        timestamp_ms: u64,
    ) -> Self {
        Self::from_delta(
            &AllowlistDelta::default(),
            total_sources,
            status,
            message,
            dry_run,
            timestamp_ms,
        )
    }
}

/// Point-in-time view of the kernel-level allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistStatus {
    pub available: bool,
    pub udp_port: u16,
    pub sync_needed: bool,
    pub desired_v4: usize,
    pub desired_v6: usize,
    /// `None` when the filter could not be read.
    pub current_v4: Option<usize>,
    pub current_v6: Option<usize>,
    pub last_sync: Option<SyncReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::network::parse_cidr;
    use crate::source::entity::{SourceStatus, make_source};

    fn nets(items: &[&str]) -> AllowlistSet {
        items.iter().map(|s| parse_cidr(s).unwrap()).collect()
    }

    #[test]
    fn desired_unions_enabled_sources_by_family() {
        let mut off = make_source("off", &["172.16.0.0/12"]);
        off.status = SourceStatus::Disabled;
        let snap = SourceSnapshot::new(
            vec![
                make_source("a", &["10.0.0.0/8", "2001:db8::/32", "junk"]),
                make_source("b", &["10.0.0.0/8", "192.168.0.0/16"]),
                off,
            ],
            1,
        );
        let set = AllowlistSet::desired_from(&snap);
        assert_eq!(set.v4.len(), 2);
        assert_eq!(set.v6.len(), 1);
        assert!(!set.v4.contains(&parse_cidr("172.16.0.0/12").unwrap()));
    }

    #[test]
    fn desired_collapses_overlapping_sources() {
        let snap = SourceSnapshot::new(
            vec![
                make_source("a", &["10.0.0.0/8", "2001:db8::/32"]),
                make_source("b", &["10.1.0.0/16", "2001:db8:ff::/48"]),
            ],
            1,
        );
        assert_eq!(
            AllowlistSet::desired_from(&snap),
            nets(&["10.0.0.0/8", "2001:db8::/32"])
        );
    }

    #[test]
    fn collapse_merges_adjacent_halves() {
        let mut set = nets(&[
            "192.168.0.0/25",
            "192.168.0.128/25",
            "192.168.1.0/24",
            "192.168.3.0/24",
            "fd00::/9",
            "fd80::/9",
        ]);
        set.collapse();
        assert_eq!(
            set,
            nets(&["192.168.0.0/23", "192.168.3.0/24", "fd00::/8"])
        );
    }

    #[test]
    fn diff_computes_adds_and_removes() {
        let desired = nets(&["10.0.0.0/8", "192.168.0.0/16", "2001:db8::/32"]);
        let current = nets(&["10.0.0.0/8", "172.16.0.0/12", "fd00::/8"]);
        let delta = desired.diff(&current);
        assert_eq!(delta.add_v4, vec![parse_cidr("192.168.0.0/16").unwrap()]);
        assert_eq!(delta.add_v6, vec![parse_cidr("2001:db8::/32").unwrap()]);
        assert_eq!(delta.remove_v4, vec![parse_cidr("172.16.0.0/12").unwrap()]);
        assert_eq!(delta.remove_v6, vec![parse_cidr("fd00::/8").unwrap()]);
    }

    #[test]
    fn diff_of_equal_sets_is_empty() {
        let a = nets(&["10.0.0.0/8", "::1"]);
        assert!(a.diff(&a.clone()).is_empty());
    }

    #[test]
    fn differently_spelled_networks_are_equal() {
        let desired = nets(&["10.1.2.3/8"]);
        let current = nets(&["10.0.0.0/8"]);
        assert!(desired.diff(&current).is_empty());
    }

    #[test]
    fn report_counts_delta() {
        let delta = nets(&["10.0.0.0/8", "::1"]).diff(&AllowlistSet::default());
        let report = SyncReport::from_delta(&delta, 3, SyncStatus::DryRun, "dry run", true, 0);
        assert_eq!(report.ipv4_added, 1);
        assert_eq!(report.ipv6_added, 1);
        assert_eq!(report.total_sources, 3);
        assert_eq!(
            serde_json::to_value(&report).unwrap()["status"],
            serde_json::json!("dry_run")
        );
    }
}
