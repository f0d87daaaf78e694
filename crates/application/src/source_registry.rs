use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use domain::audit::change::{ChangeActor, ChangeEntry};
use domain::common::entity::current_timestamp_ms;
use domain::common::error::DomainError;
use domain::source::entity::{HealthStatus, Source};
use domain::source::snapshot::SourceSnapshot;
use ports::secondary::source_repository::SourceRepository;
use tokio_util::sync::CancellationToken;

use crate::change_history::ChangeHistory;

/// Registry tuning.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    /// Reject malformed CIDRs on create and update.
    pub strict_cidr: bool,
    pub refresh_interval: Duration,
    /// A source not seen for this long is degraded.
    pub degraded_after: Duration,
    /// A source not seen for this long is stale.
    pub stale_after: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            strict_cidr: true,
            refresh_interval: Duration::from_secs(30),
            degraded_after: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Authoritative source registry.
///
/// Writes go to the repository first, then the in-memory snapshot is
/// rebuilt and swapped atomically. Readers on the hot path only ever
/// load the current snapshot and never block writers.
pub struct SourceRegistry {
    repo: Arc<dyn SourceRepository>,
    snapshot: ArcSwap<SourceSnapshot>,
    version: AtomicU64,
    /// Held from repository read to snapshot swap so a slow reload can
    /// never overwrite a newer one.
    refresh_lock: Mutex<()>,
    last_seen: DashMap<String, u64>,
    settings: RegistrySettings,
    history: Arc<ChangeHistory>,
}

impl SourceRegistry {
    pub fn new(
        repo: Arc<dyn SourceRepository>,
        settings: RegistrySettings,
        history: Arc<ChangeHistory>,
    ) -> Self {
        Self {
            repo,
            snapshot: ArcSwap::from_pointee(SourceSnapshot::default()),
            version: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
            last_seen: DashMap::new(),
            settings,
            history,
        }
    }

    pub fn settings(&self) -> RegistrySettings {
        self.settings
    }

    /// Current snapshot. Cheap; safe to call per request.
    pub fn snapshot(&self) -> Arc<SourceSnapshot> {
        self.snapshot.load_full()
    }

    /// Reload from the repository. On failure the previous snapshot stays
    /// in place.
    pub fn refresh(&self) -> Result<usize, DomainError> {
        let _guard = self
            .refresh_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let sources = self.repo.list()?;
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = SourceSnapshot::new(sources, version);
        let count = snapshot.len();
        let malformed = snapshot.malformed_count();
        if malformed > 0 {
            tracing::warn!(malformed, "sources carry malformed allowed_ips entries");
        }
        self.snapshot.store(Arc::new(snapshot));
        self.last_seen
            .retain(|id, _| self.snapshot.load().get(id).is_some());
        tracing::debug!(count, version, "source snapshot refreshed");
        Ok(count)
    }

    /// Periodically reload the snapshot until cancelled.
    pub async fn run_refresh_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh() {
                        tracing::warn!(error = %e, "source refresh failed, keeping previous snapshot");
                    }
                }
            }
        }
        tracing::info!("source refresh loop stopped");
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// All sources from the snapshot, sorted by id, with health filled in.
    pub fn list(&self) -> Vec<Source> {
        let now = current_timestamp_ms();
        let snapshot = self.snapshot();
        let mut sources: Vec<Source> = snapshot
            .iter()
            .map(|c| self.with_health(c.source.clone(), now))
            .collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        sources
    }

    pub fn get(&self, id: &str) -> Result<Source, DomainError> {
        self.snapshot()
            .get(id)
            .map(|c| self.with_health(c.source.clone(), current_timestamp_ms()))
            .ok_or_else(|| DomainError::NotFound(format!("source {id}")))
    }

    /// Note traffic from a known source for health tracking.
    pub fn mark_seen(&self, id: &str, now_ms: u64) {
        if let Some(mut entry) = self.last_seen.get_mut(id) {
            *entry = (*entry).max(now_ms);
            return;
        }
        self.last_seen.insert(id.to_string(), now_ms);
    }

    pub fn health_of(&self, id: &str, now_ms: u64) -> HealthStatus {
        let seen = self.last_seen.get(id).map(|v| *v);
        HealthStatus::derive(
            seen,
            now_ms,
            duration_ms(self.settings.degraded_after),
            duration_ms(self.settings.stale_after),
        )
    }

    fn with_health(&self, mut source: Source, now_ms: u64) -> Source {
        source.health_status = self.health_of(&source.id, now_ms);
        source
    }

    // ── Writes ─────────────────────────────────────────────────────

    pub fn create(&self, mut source: Source, actor: ChangeActor) -> Result<Source, DomainError> {
        source.validate(self.settings.strict_cidr)?;
        let now = current_timestamp_ms();
        source.created_at_ms = now;
        source.updated_at_ms = now;
        source.health_status = HealthStatus::default();

        self.repo.create(&source)?;
        self.refresh_after_write();
        self.history.record(ChangeEntry::new(
            actor,
            "create_source",
            format!("source:{}", source.id),
            serde_json::Value::Null,
            to_json(&source),
        ));
        tracing::info!(source_id = %source.id, tenant_id = %source.tenant_id, "source created");
        Ok(source)
    }

    /// Replace a source. The id in the path wins over the body and the
    /// creation time is preserved.
    pub fn update(
        &self,
        id: &str,
        mut source: Source,
        actor: ChangeActor,
    ) -> Result<Source, DomainError> {
        if !source.id.is_empty() && source.id != id {
            return Err(DomainError::InvalidInput(format!(
                "body id '{}' does not match path id '{id}'",
                source.id
            )));
        }
        source.id = id.to_string();
        source.validate(self.settings.strict_cidr)?;

        let before = self
            .repo
            .get(id)?
            .ok_or_else(|| DomainError::NotFound(format!("source {id}")))?;
        source.created_at_ms = before.created_at_ms;
        source.updated_at_ms = current_timestamp_ms().max(before.created_at_ms);
        source.health_status = HealthStatus::default();

        self.repo.update(&source)?;
        self.refresh_after_write();
        self.history.record(ChangeEntry::new(
            actor,
            "update_source",
            format!("source:{id}"),
            to_json(&before),
            to_json(&source),
        ));
        tracing::info!(source_id = %id, status = %source.status, "source updated");
        Ok(source)
    }

    pub fn delete(&self, id: &str, actor: ChangeActor) -> Result<(), DomainError> {
        let before = self.repo.get(id)?;
        self.repo.delete(id)?;
        self.last_seen.remove(id);
        self.refresh_after_write();
        self.history.record(ChangeEntry::new(
            actor,
            "delete_source",
            format!("source:{id}"),
            before.as_ref().map_or(serde_json::Value::Null, to_json),
            serde_json::Value::Null,
        ));
        tracing::info!(source_id = %id, "source deleted");
        Ok(())
    }

    /// The write already reached the store; a failed reload is retried by
    /// the refresh loop.
    fn refresh_after_write(&self) {
        if let Err(e) = self.refresh() {
            tracing::warn!(error = %e, "snapshot refresh after write failed");
        }
    }
}

fn to_json(source: &Source) -> serde_json::Value {
    serde_json::to_value(source).unwrap_or(serde_json::Value::Null)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    use domain::source::entity::SourceStatus;
    use ports::test_utils::InMemorySourceRepository;

    use super::*;

    pub(crate) fn make_source(id: &str, ips: &[&str]) -> Source {
        Source {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            source_type: "netflow".to_string(),
            status: SourceStatus::Enabled,
            health_status: HealthStatus::default(),
            allowed_ips: ips.iter().map(|s| (*s).to_string()).collect(),
            max_eps: 0,
            block_on_exceed: true,
            description: None,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    pub(crate) fn make_registry(sources: Vec<Source>) -> Arc<SourceRegistry> {
        let repo = Arc::new(InMemorySourceRepository::with_sources(sources));
        let registry = SourceRegistry::new(
            repo,
            RegistrySettings::default(),
            Arc::new(ChangeHistory::default()),
        );
        registry.refresh().unwrap();
        Arc::new(registry)
    }

    // ── Reads ──────────────────────────────────────────────────────

    #[test]
    fn refresh_loads_sources_sorted() {
        let registry = make_registry(vec![
            make_source("b", &["10.0.0.0/8"]),
            make_source("a", &["192.168.0.0/16"]),
        ]);
        let ids: Vec<_> = registry.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(registry.snapshot().version(), 1);
    }

    #[test]
    fn get_missing_is_not_found() {
        let registry = make_registry(vec![]);
        assert!(matches!(registry.get("nope"), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let repo = Arc::new(InMemorySourceRepository::with_sources(vec![make_source(
            "a",
            &["10.0.0.0/8"],
        )]));
        let registry = SourceRegistry::new(
            repo.clone(),
            RegistrySettings::default(),
            Arc::new(ChangeHistory::default()),
        );
        registry.refresh().unwrap();

        repo.fail_reads.store(true, Ordering::Relaxed);
        assert!(registry.refresh().is_err());
        assert_eq!(registry.snapshot().len(), 1);
    }

    // ── Writes ─────────────────────────────────────────────────────

    #[test]
    fn create_is_visible_immediately() {
        let registry = make_registry(vec![]);
        let created = registry
            .create(make_source("s1", &["10.0.0.0/8"]), ChangeActor::Cli)
            .unwrap();
        assert!(created.created_at_ms > 0);
        assert!(registry.snapshot().get("s1").is_some());
    }

    #[test]
    fn create_rejects_malformed_cidr_in_strict_mode() {
        let registry = make_registry(vec![]);
        let err = registry
            .create(make_source("s1", &["10.0.0.0/33"]), ChangeActor::Cli)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn create_duplicate_fails() {
        let registry = make_registry(vec![make_source("s1", &[])]);
        let err = registry
            .create(make_source("s1", &[]), ChangeActor::Cli)
            .unwrap_err();
        assert!(matches!(err, DomainError::Duplicate(_)));
    }

    #[test]
    fn update_preserves_created_at_and_rejects_id_mismatch() {
        let mut original = make_source("s1", &["10.0.0.0/8"]);
        original.created_at_ms = 42;
        let registry = make_registry(vec![original]);

        let mut next = make_source("s1", &["10.1.0.0/16"]);
        next.status = SourceStatus::Disabled;
        let updated = registry.update("s1", next, ChangeActor::Cli).unwrap();
        assert_eq!(updated.created_at_ms, 42);
        assert!(!registry.snapshot().get("s1").unwrap().source.is_enabled());

        let err = registry
            .update("s1", make_source("other", &[]), ChangeActor::Cli)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn update_missing_is_not_found() {
        let registry = make_registry(vec![]);
        let err = registry
            .update("ghost", make_source("ghost", &[]), ChangeActor::Cli)
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn delete_excludes_source_immediately() {
        let registry = make_registry(vec![make_source("s1", &["10.0.0.0/8"])]);
        registry.delete("s1", ChangeActor::Cli).unwrap();
        assert!(registry.snapshot().get("s1").is_none());
        assert!(matches!(
            registry.delete("s1", ChangeActor::Cli),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn writes_are_recorded_in_history() {
        let history = Arc::new(ChangeHistory::default());
        let registry = SourceRegistry::new(
            Arc::new(InMemorySourceRepository::default()),
            RegistrySettings::default(),
            history.clone(),
        );
        registry
            .create(make_source("s1", &[]), ChangeActor::Api("ops".into()))
            .unwrap();
        registry.delete("s1", ChangeActor::Cli).unwrap();

        let recent = history.recent(10, Some("source:"));
        let actions: Vec<_> = recent.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["delete_source", "create_source"]);
    }

    // ── Health ─────────────────────────────────────────────────────

    #[test]
    fn health_follows_last_seen() {
        let registry = make_registry(vec![make_source("s1", &[])]);
        assert_eq!(registry.health_of("s1", 1_000_000), HealthStatus::Stale);

        registry.mark_seen("s1", 1_000_000);
        assert_eq!(registry.health_of("s1", 1_000_500), HealthStatus::Healthy);
        assert_eq!(registry.health_of("s1", 1_090_000), HealthStatus::Degraded);
        assert_eq!(registry.health_of("s1", 1_400_000), HealthStatus::Stale);
    }

    #[test]
    fn mark_seen_never_moves_backwards() {
        let registry = make_registry(vec![make_source("s1", &[])]);
        registry.mark_seen("s1", 2_000);
        registry.mark_seen("s1", 1_000);
        assert_eq!(registry.health_of("s1", 2_500), HealthStatus::Healthy);
    }

    // ── Refresh loop ───────────────────────────────────────────────

    #[tokio::test]
    async fn refresh_loop_stops_on_cancel() {
        let registry = make_registry(vec![]);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(registry.clone().run_refresh_loop(cancel.clone()));
        cancel.cancel();
        handle.await.unwrap();
    }

    /// Repository whose first armed `list` parks after reading until the
    /// test releases it.
    struct ParkedListRepo {
        inner: InMemorySourceRepository,
        armed: AtomicBool,
        listed: mpsc::Sender<()>,
        deleted: mpsc::Sender<()>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl SourceRepository for ParkedListRepo {
        fn list(&self) -> Result<Vec<Source>, DomainError> {
            let sources = self.inner.list()?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.listed.send(()).unwrap();
                let release = self.release.lock().unwrap();
                release.recv_timeout(Duration::from_secs(5)).unwrap();
            }
            Ok(sources)
        }

        fn get(&self, id: &str) -> Result<Option<Source>, DomainError> {
            self.inner.get(id)
        }

        fn create(&self, source: &Source) -> Result<(), DomainError> {
            self.inner.create(source)
        }

        fn update(&self, source: &Source) -> Result<(), DomainError> {
            self.inner.update(source)
        }

        fn delete(&self, id: &str) -> Result<(), DomainError> {
            self.inner.delete(id)?;
            self.deleted.send(()).unwrap();
            Ok(())
        }
    }

    #[test]
    fn slow_refresh_cannot_resurrect_deleted_source() {
        let (listed_tx, listed_rx) = mpsc::channel();
        let (deleted_tx, deleted_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let repo = Arc::new(ParkedListRepo {
            inner: InMemorySourceRepository::with_sources(vec![make_source(
                "s1",
                &["10.0.0.0/8"],
            )]),
            armed: AtomicBool::new(true),
            listed: listed_tx,
            deleted: deleted_tx,
            release: Mutex::new(release_rx),
        });
        let registry = Arc::new(SourceRegistry::new(
            repo,
            RegistrySettings::default(),
            Arc::new(ChangeHistory::default()),
        ));

        let periodic = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.refresh())
        };
        listed_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.delete("s1", ChangeActor::Cli))
        };
        deleted_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        release_tx.send(()).unwrap();

        periodic.join().unwrap().unwrap();
        writer.join().unwrap().unwrap();
        assert!(registry.snapshot().get("s1").is_none());
        assert_eq!(registry.snapshot().version(), 2);
    }
}
