use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use domain::admission::engine::{AdmissionEngine, EvalMode};
use domain::admission::entity::{AdmissionReason, AdmissionRequest, Decision, IntakePath};
use domain::admission::flags::FeatureFlags;
use domain::common::entity::current_timestamp_ms;
use domain::common::error::DomainError;
use ports::secondary::metrics_port::MetricsPort;

use crate::feature_flag_service::FeatureFlagService;
use crate::source_registry::SourceRegistry;

/// Outcome of an admission check as seen by an intake path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionOutcome {
    /// Final decision, log-only already applied.
    pub decision: Decision,
    /// `false` when the path's enable flag is off and nothing was checked.
    pub evaluated: bool,
    /// Tenant of the attributed source, if it is registered.
    pub tenant_id: Option<String>,
}

impl AdmissionOutcome {
    pub fn allowed(&self) -> bool {
        self.decision.allowed
    }
}

/// Application-layer admission control shared by the HTTP and UDP paths.
///
/// Both paths evaluate against the same engine, so rate-limiter state is
/// counted once per source regardless of entry point.
pub struct AdmissionService {
    engine: AdmissionEngine,
    registry: Arc<SourceRegistry>,
    flags: Arc<FeatureFlagService>,
    metrics: Arc<dyn MetricsPort>,
    pruned_version: AtomicU64,
}

impl AdmissionService {
    pub fn new(
        registry: Arc<SourceRegistry>,
        flags: Arc<FeatureFlagService>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            engine: AdmissionEngine::new(),
            registry,
            flags,
            metrics,
            pruned_version: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn flags(&self) -> FeatureFlags {
        self.flags.get()
    }

    /// Live admission check for one unit of intake work.
    ///
    /// Engine failures never surface: they resolve through the fail-open
    /// flag and are counted like any other reason.
    pub fn check(
        &self,
        path: IntakePath,
        source_id: &str,
        client_ip: IpAddr,
        record_count: u64,
    ) -> AdmissionOutcome {
        let flags = self.flags.get();
        let snapshot = self.registry.snapshot();
        self.prune_if_stale(&snapshot);

        let tenant_id = snapshot.get(source_id).map(|c| c.source.tenant_id.clone());
        if tenant_id.is_some() {
            self.registry.mark_seen(source_id, current_timestamp_ms());
        }

        let enabled = match path {
            IntakePath::Http => flags.http_enabled,
            IntakePath::Udp => flags.udp_enabled,
        };
        if !enabled {
            return AdmissionOutcome {
                decision: Decision::allow(AdmissionReason::Ok),
                evaluated: false,
                tenant_id,
            };
        }

        let request = AdmissionRequest {
            source_id,
            client_ip,
            record_count,
        };
        let raw = match self
            .engine
            .evaluate(&snapshot, &flags, &request, EvalMode::Commit)
        {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    source_id,
                    error = %e,
                    fail_open = flags.fail_open,
                    "admission engine error, resolving by posture"
                );
                Decision::by_posture(flags.fail_open, AdmissionReason::InternalError)
            }
        };

        if raw.over_limit {
            tracing::info!(source_id, record_count, "rate limit exceeded, admitting overage");
        }
        let decision = raw.apply_log_only(flags.log_only);
        if decision.log_only_override {
            tracing::info!(
                source_id,
                client_ip = %client_ip,
                reason = %raw.reason,
                path = path.as_str(),
                "log-only: would have blocked"
            );
        } else if !decision.allowed {
            tracing::debug!(
                source_id,
                client_ip = %client_ip,
                reason = %raw.reason,
                path = path.as_str(),
                "admission blocked"
            );
        }

        self.metrics.record_admission(
            path.as_str(),
            metric_source_label(source_id, tenant_id.is_some()),
            raw.reason.as_str(),
            decision.allowed,
        );

        AdmissionOutcome {
            decision,
            evaluated: true,
            tenant_id,
        }
    }

    /// What enforcement would decide for `client_ip` right now, without
    /// touching bucket state, metrics or health. Ignores the path enable
    /// flags and log-only so operators see the policy verdict.
    pub fn test_admission(
        &self,
        source_id: &str,
        client_ip: IpAddr,
        record_count: u64,
    ) -> Result<Decision, DomainError> {
        let snapshot = self.registry.snapshot();
        if snapshot.get(source_id).is_none() {
            return Err(DomainError::NotFound(format!("source {source_id}")));
        }
        let flags = self.flags.get();
        let request = AdmissionRequest {
            source_id,
            client_ip,
            record_count,
        };
        Ok(self
            .engine
            .evaluate(&snapshot, &flags, &request, EvalMode::DryRun)
            .unwrap_or_else(|_| {
                Decision::by_posture(flags.fail_open, AdmissionReason::InternalError)
            }))
    }

    /// Attribute a UDP datagram to a registered source by its sender.
    pub fn resolve_source(&self, client_ip: IpAddr) -> Option<String> {
        self.registry
            .snapshot()
            .resolve_by_ip(client_ip)
            .map(|c| c.source.id.clone())
    }

    pub fn bucket_count(&self) -> usize {
        self.engine.bucket_count()
    }

    /// Drop buckets of sources that left the registry, once per snapshot.
    fn prune_if_stale(&self, snapshot: &domain::source::snapshot::SourceSnapshot) {
        let version = snapshot.version();
        let seen = self.pruned_version.load(Ordering::Relaxed);
        if version != seen
            && self
                .pruned_version
                .compare_exchange(seen, version, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            let removed = self.engine.prune(snapshot);
            if removed > 0 {
                tracing::debug!(removed, version, "pruned rate limiter buckets");
            }
        }
    }
}

/// Unattributed traffic shares one label to bound series cardinality.
/// Only registered ids become label values; anything a client can invent
/// collapses into one series.
fn metric_source_label(source_id: &str, registered: bool) -> &str {
    if registered { source_id } else { "unknown" }
}
