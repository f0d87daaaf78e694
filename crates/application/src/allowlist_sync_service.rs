use std::sync::{Arc, PoisonError, RwLock};

use domain::allowlist::entity::{AllowlistSet, AllowlistStatus, SyncReport, SyncStatus};
use domain::allowlist::error::AllowlistError;
use domain::common::entity::current_timestamp_ms;
use domain::common::error::DomainError;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::packet_filter::PacketFilterPort;
use tokio::sync::Mutex;

use crate::source_registry::SourceRegistry;

/// Reconciles the host packet filter with the enabled sources' CIDRs.
///
/// Only the delta is applied, never a flush-and-rebuild. Concurrent runs
/// are refused rather than queued.
pub struct AllowlistSyncService {
    registry: Arc<SourceRegistry>,
    filter: Arc<dyn PacketFilterPort>,
    metrics: Arc<dyn MetricsPort>,
    udp_port: u16,
    running: Mutex<()>,
    last_report: RwLock<Option<SyncReport>>,
}

impl AllowlistSyncService {
    pub fn new(
        registry: Arc<SourceRegistry>,
        filter: Arc<dyn PacketFilterPort>,
        metrics: Arc<dyn MetricsPort>,
        udp_port: u16,
    ) -> Self {
        Self {
            registry,
            filter,
            metrics,
            udp_port,
            running: Mutex::new(()),
            last_report: RwLock::new(None),
        }
    }

    /// Run one reconciliation.
    ///
    /// Filter failures come back as a report with `unavailable` or
    /// `failed` status. The only error is a sync already in progress.
    pub async fn sync(&self, dry_run: bool) -> Result<SyncReport, DomainError> {
        let Ok(_guard) = self.running.try_lock() else {
            return Err(AllowlistError::SyncInProgress.into());
        };

        let report = self.reconcile(dry_run).await;
        match report.status {
            SyncStatus::Failed => {
                tracing::error!(message = %report.message, "allowlist sync failed");
            }
            SyncStatus::Unavailable => {
                tracing::warn!(message = %report.message, "packet filter unavailable, allowlist not synced");
            }
            _ => tracing::info!(
                status = report.status.as_str(),
                ipv4_added = report.ipv4_added,
                ipv6_added = report.ipv6_added,
                ipv4_removed = report.ipv4_removed,
                ipv6_removed = report.ipv6_removed,
                dry_run,
                "allowlist sync finished"
            ),
        }
        self.metrics.record_allowlist_sync(report.status.as_str());
        if !dry_run {
            *self
                .last_report
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        }
        Ok(report)
    }

    async fn reconcile(&self, dry_run: bool) -> SyncReport {
        let snapshot = self.registry.snapshot();
        let total = snapshot.enabled().count();
        let now = current_timestamp_ms();

        if !self.filter.available().await {
            return SyncReport::empty(
                total,
                SyncStatus::Unavailable,
                "packet filter not available on this host",
                dry_run,
                now,
            );
        }

        let current = match self.filter.current_set().await {
            Ok(set) => set,
            Err(e) => {
                return SyncReport::empty(
                    total,
                    SyncStatus::Failed,
                    format!("reading current set: {e}"),
                    dry_run,
                    now,
                );
            }
        };
        let desired = AllowlistSet::desired_from(&snapshot);
        let delta = desired.diff(&current);

        if delta.is_empty() {
            return SyncReport::from_delta(&delta, total, SyncStatus::Unchanged, "in sync", dry_run, now);
        }
        if dry_run {
            return SyncReport::from_delta(
                &delta,
                total,
                SyncStatus::DryRun,
                "delta computed, filter untouched",
                dry_run,
                now,
            );
        }
        match self.filter.apply(&delta).await {
            Ok(()) => SyncReport::from_delta(&delta, total, SyncStatus::Applied, "delta applied", false, now),
            Err(e) => SyncReport::from_delta(
                &delta,
                total,
                SyncStatus::Failed,
                format!("applying delta: {e}"),
                false,
                now,
            ),
        }
    }

    pub async fn status(&self) -> AllowlistStatus {
        let snapshot = self.registry.snapshot();
        let desired = AllowlistSet::desired_from(&snapshot);
        let available = self.filter.available().await;
        let current = if available {
            self.filter.current_set().await.ok()
        } else {
            None
        };
        let sync_needed = current.as_ref().is_some_and(|c| !desired.diff(c).is_empty());
        let last_sync = self
            .last_report
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        AllowlistStatus {
            available,
            udp_port: self.udp_port,
            sync_needed,
            desired_v4: desired.v4.len(),
            desired_v6: desired.v6.len(),
            current_v4: current.as_ref().map(|c| c.v4.len()),
            current_v6: current.as_ref().map(|c| c.v6.len()),
            last_sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use domain::audit::change::ChangeActor;
    use domain::source::entity::SourceStatus;
    use ports::test_utils::{FakePacketFilter, NoopMetrics, RecordingMetrics};

    use super::*;
    use crate::source_registry::tests::{make_registry, make_source};

    fn make_service(filter: Arc<FakePacketFilter>) -> AllowlistSyncService {
        let mut disabled = make_source("off", &["203.0.113.0/24"]);
        disabled.status = SourceStatus::Disabled;
        let registry = make_registry(vec![
            make_source("s1", &["10.0.0.0/8", "2001:db8::/32"]),
            make_source("s2", &["192.168.0.0/16", "not-a-cidr"]),
            disabled,
        ]);
        AllowlistSyncService::new(registry, filter, Arc::new(NoopMetrics), 2055)
    }

    #[tokio::test]
    async fn first_sync_applies_enabled_cidrs() {
        let filter = Arc::new(FakePacketFilter::new(true));
        let svc = make_service(filter.clone());

        let report = svc.sync(false).await.unwrap();
        assert_eq!(report.status, SyncStatus::Applied);
        assert_eq!(report.ipv4_added, 2);
        assert_eq!(report.ipv6_added, 1);
        assert_eq!(report.total_sources, 2);
        assert_eq!(filter.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn second_sync_is_idempotent() {
        let filter = Arc::new(FakePacketFilter::new(true));
        let svc = make_service(filter.clone());
        svc.sync(false).await.unwrap();

        let report = svc.sync(false).await.unwrap();
        assert_eq!(report.status, SyncStatus::Unchanged);
        assert_eq!(report.ipv4_added + report.ipv6_added, 0);
        assert_eq!(filter.apply_count(), 1);
    }

    #[tokio::test]
    async fn overlapping_sources_converge_after_one_sync() {
        let filter = Arc::new(FakePacketFilter::new(true));
        let registry = make_registry(vec![
            make_source("wide", &["10.0.0.0/8"]),
            make_source("narrow", &["10.1.0.0/16", "10.2.0.0/16"]),
        ]);
        let svc = AllowlistSyncService::new(registry, filter.clone(), Arc::new(NoopMetrics), 2055);

        let first = svc.sync(false).await.unwrap();
        assert_eq!(first.ipv4_added, 1);
        assert_eq!(filter.snapshot().len(), 1);

        let second = svc.sync(false).await.unwrap();
        assert_eq!(second.status, SyncStatus::Unchanged);
        assert_eq!(second.ipv4_added + second.ipv4_removed, 0);
        assert_eq!(filter.apply_count(), 1);
    }

    #[tokio::test]
    async fn dry_run_leaves_filter_untouched() {
        let filter = Arc::new(FakePacketFilter::new(true));
        let svc = make_service(filter.clone());

        let report = svc.sync(true).await.unwrap();
        assert_eq!(report.status, SyncStatus::DryRun);
        assert!(report.dry_run);
        assert_eq!(report.ipv4_added, 2);
        assert_eq!(filter.apply_count(), 0);
        assert!(svc.status().await.last_sync.is_none());
    }

    #[tokio::test]
    async fn removals_are_applied_as_delta() {
        let filter = Arc::new(FakePacketFilter::new(true));
        let svc = make_service(filter.clone());
        svc.sync(false).await.unwrap();

        svc.registry.delete("s2", ChangeActor::Cli).unwrap();
        let report = svc.sync(false).await.unwrap();
        assert_eq!(report.ipv4_removed, 1);
        assert_eq!(report.ipv4_added, 0);
        assert_eq!(filter.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn unavailable_filter_reports_instead_of_failing() {
        let filter = Arc::new(FakePacketFilter::new(false));
        let metrics = Arc::new(RecordingMetrics::default());
        let registry = make_registry(vec![make_source("s1", &["10.0.0.0/8"])]);
        let svc = AllowlistSyncService::new(registry, filter, metrics.clone(), 2055);

        let report = svc.sync(false).await.unwrap();
        assert_eq!(report.status, SyncStatus::Unavailable);
        assert_eq!(metrics.events(), vec!["sync:unavailable".to_string()]);

        let status = svc.status().await;
        assert!(!status.available);
        assert!(!status.sync_needed);
        assert_eq!(status.current_v4, None);
        assert_eq!(status.desired_v4, 1);
    }

    #[tokio::test]
    async fn concurrent_sync_is_refused() {
        let filter = Arc::new(FakePacketFilter::new(true));
        let svc = make_service(filter);
        let _held = svc.running.try_lock().unwrap();

        let err = svc.sync(false).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn status_reports_sync_needed() {
        let filter = Arc::new(FakePacketFilter::new(true));
        let svc = make_service(filter.clone());

        let before = svc.status().await;
        assert!(before.sync_needed);
        assert_eq!(before.udp_port, 2055);
        assert_eq!(before.current_v4, Some(0));

        svc.sync(false).await.unwrap();
        let after = svc.status().await;
        assert!(!after.sync_needed);
        assert_eq!(after.last_sync.map(|r| r.status), Some(SyncStatus::Applied));

        filter.available.store(false, Ordering::Relaxed);
        assert!(!svc.status().await.available);
    }
}
