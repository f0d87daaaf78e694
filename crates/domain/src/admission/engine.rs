use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;

use crate::source::snapshot::{AllowlistMatch, SourceSnapshot};

use super::bucket::{BucketOutcome, TokenBucket};
use super::entity::{AdmissionReason, AdmissionRequest, Decision};
use super::error::AdmissionError;
use super::flags::FeatureFlags;

/// Whether an evaluation may mutate rate-limiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Commit,
    /// Answer as `Commit` would, without creating or debiting buckets.
    DryRun,
}

/// Per-source admission engine.
///
/// Rate-limiter state is keyed by source id. Each bucket sits behind its
/// own mutex so unrelated sources never contend. Both intake paths share
/// one engine and therefore one set of buckets.
#[derive(Debug, Default)]
pub struct AdmissionEngine {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl AdmissionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &self,
        snapshot: &SourceSnapshot,
        flags: &FeatureFlags,
        request: &AdmissionRequest<'_>,
        mode: EvalMode,
    ) -> Result<Decision, AdmissionError> {
        self.evaluate_at(snapshot, flags, request, mode, Instant::now())
    }

    /// Evaluate in fixed order; the first matching rule decides.
    ///
    /// The log-only override is not applied here.
    pub fn evaluate_at(
        &self,
        snapshot: &SourceSnapshot,
        flags: &FeatureFlags,
        request: &AdmissionRequest<'_>,
        mode: EvalMode,
        now: Instant,
    ) -> Result<Decision, AdmissionError> {
        let Some(compiled) = snapshot.get(request.source_id) else {
            return Ok(Decision::by_posture(flags.fail_open, AdmissionReason::UnknownSource));
        };
        let source = &compiled.source;

        if !source.is_enabled() {
            return Ok(Decision::block(AdmissionReason::Disabled));
        }

        match compiled.match_ip(request.client_ip) {
            AllowlistMatch::Matched => {}
            AllowlistMatch::NotMatched => return Ok(Decision::block(AdmissionReason::IpNotAllowed)),
            AllowlistMatch::NoValidEntries => {
                return Ok(Decision::by_posture(
                    flags.fail_open,
                    AdmissionReason::InvalidAllowlist,
                ));
            }
        }

        if source.max_eps == 0 {
            return Ok(Decision::allow(AdmissionReason::Ok));
        }

        let outcome = match mode {
            EvalMode::Commit => {
                let bucket = self.bucket_for(&source.id, source.max_eps, now);
                let mut guard = bucket.lock().map_err(|_| AdmissionError::BucketPoisoned {
                    source_id: source.id.clone(),
                })?;
                if !guard.has_capacity(source.max_eps) {
                    *guard = TokenBucket::new(source.max_eps, now);
                }
                guard.take(request.record_count, source.block_on_exceed, now)
            }
            EvalMode::DryRun => self.peek(&source.id, source.max_eps, request, source.block_on_exceed, now)?,
        };

        Ok(match outcome {
            BucketOutcome::Admitted => Decision::allow(AdmissionReason::Ok),
            BucketOutcome::Exceeded { retry_after } => {
                Decision::block(AdmissionReason::RateLimit).with_retry_after(retry_after)
            }
            BucketOutcome::Overage => Decision {
                over_limit: true,
                ..Decision::allow(AdmissionReason::Ok)
            },
        })
    }

    /// Drop buckets for sources no longer in the snapshot.
    pub fn prune(&self, snapshot: &SourceSnapshot) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|id, _| snapshot.get(id).is_some());
        before - self.buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_for(&self, source_id: &str, max_eps: u64, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(existing) = self.buckets.get(source_id) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.buckets
                .entry(source_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(max_eps, now))))
                .value(),
        )
    }

    fn peek(
        &self,
        source_id: &str,
        max_eps: u64,
        request: &AdmissionRequest<'_>,
        block_on_exceed: bool,
        now: Instant,
    ) -> Result<BucketOutcome, AdmissionError> {
        let Some(bucket) = self.buckets.get(source_id).map(|b| Arc::clone(b.value())) else {
            return Ok(TokenBucket::new(max_eps, now).peek(request.record_count, block_on_exceed, now));
        };
        let guard = bucket.lock().map_err(|_| AdmissionError::BucketPoisoned {
            source_id: source_id.to_string(),
        })?;
        if guard.has_capacity(max_eps) {
            Ok(guard.peek(request.record_count, block_on_exceed, now))
        } else {
            Ok(TokenBucket::new(max_eps, now).peek(request.record_count, block_on_exceed, now))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::time::Duration;

    use super::*;
    use crate::source::entity::{Source, SourceStatus, make_source};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn make_snapshot(sources: Vec<Source>) -> SourceSnapshot {
        SourceSnapshot::new(sources, 1)
    }

    fn enforcing() -> FeatureFlags {
        FeatureFlags {
            http_enabled: true,
            udp_enabled: true,
            log_only: false,
            fail_open: false,
        }
    }

    fn req<'a>(source_id: &'a str, client_ip: &str, record_count: u64) -> AdmissionRequest<'a> {
        AdmissionRequest {
            source_id,
            client_ip: ip(client_ip),
            record_count,
        }
    }

    fn limited(id: &str, max_eps: u64, block_on_exceed: bool) -> Source {
        let mut s = make_source(id, &["10.0.0.0/8"]);
        s.max_eps = max_eps;
        s.block_on_exceed = block_on_exceed;
        s
    }

    // ── Ordering ────────────────────────────────────────────────────

    #[test]
    fn allowed_ip_unlimited_is_ok() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![make_source("s1", &["10.0.0.0/8"])]);
        let d = engine
            .evaluate(&snap, &enforcing(), &req("s1", "10.1.2.3", 1), EvalMode::Commit)
            .unwrap();
        assert!(d.allowed);
        assert_eq!(d.reason, AdmissionReason::Ok);
        assert_eq!(engine.bucket_count(), 0);
    }

    #[test]
    fn disabled_source_blocks_any_ip() {
        let engine = AdmissionEngine::new();
        let mut s2 = make_source("s2", &["0.0.0.0/0"]);
        s2.status = SourceStatus::Disabled;
        let snap = make_snapshot(vec![s2]);
        for client in ["10.0.0.1", "192.168.1.1", "2001:db8::1"] {
            let d = engine
                .evaluate(&snap, &enforcing(), &req("s2", client, 1), EvalMode::Commit)
                .unwrap();
            assert!(!d.allowed);
            assert_eq!(d.reason, AdmissionReason::Disabled);
        }
    }

    #[test]
    fn unknown_source_follows_fail_open() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![]);
        let closed = engine
            .evaluate(&snap, &enforcing(), &req("ghost", "10.0.0.1", 1), EvalMode::Commit)
            .unwrap();
        assert!(!closed.allowed);
        assert_eq!(closed.reason, AdmissionReason::UnknownSource);

        let open_flags = FeatureFlags {
            fail_open: true,
            ..enforcing()
        };
        let open = engine
            .evaluate(&snap, &open_flags, &req("ghost", "10.0.0.1", 1), EvalMode::Commit)
            .unwrap();
        assert!(open.allowed);
        assert_eq!(open.reason, AdmissionReason::UnknownSource);
    }

    #[test]
    fn ip_outside_allowlist_blocks() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![make_source("s1", &["192.168.1.0/24"])]);
        let hit = engine
            .evaluate(&snap, &enforcing(), &req("s1", "192.168.1.100", 1), EvalMode::Commit)
            .unwrap();
        assert!(hit.allowed);
        let miss = engine
            .evaluate(&snap, &enforcing(), &req("s1", "192.168.2.100", 1), EvalMode::Commit)
            .unwrap();
        assert_eq!(miss.reason, AdmissionReason::IpNotAllowed);
        assert!(!miss.allowed);
    }

    #[test]
    fn empty_allowlist_blocks() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![make_source("s1", &[])]);
        let d = engine
            .evaluate(&snap, &enforcing(), &req("s1", "10.0.0.1", 1), EvalMode::Commit)
            .unwrap();
        assert_eq!(d.reason, AdmissionReason::IpNotAllowed);
    }

    #[test]
    fn mixed_malformed_entries_match_on_valid_ones() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![make_source("s1", &["bogus", "192.168.1.0/24", "1.2.3.4/99"])]);
        let d = engine
            .evaluate(&snap, &enforcing(), &req("s1", "192.168.1.100", 1), EvalMode::Commit)
            .unwrap();
        assert!(d.allowed);
        let d = engine
            .evaluate(&snap, &enforcing(), &req("s1", "10.0.0.1", 1), EvalMode::Commit)
            .unwrap();
        assert_eq!(d.reason, AdmissionReason::IpNotAllowed);
    }

    #[test]
    fn all_malformed_follows_fail_open() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![make_source("s1", &["bogus", "nope/8"])]);
        let closed = engine
            .evaluate(&snap, &enforcing(), &req("s1", "10.0.0.1", 1), EvalMode::Commit)
            .unwrap();
        assert!(!closed.allowed);
        assert_eq!(closed.reason, AdmissionReason::InvalidAllowlist);

        let open_flags = FeatureFlags {
            fail_open: true,
            ..enforcing()
        };
        let open = engine
            .evaluate(&snap, &open_flags, &req("s1", "10.0.0.1", 1), EvalMode::Commit)
            .unwrap();
        assert!(open.allowed);
        assert_eq!(open.reason, AdmissionReason::InvalidAllowlist);
    }

    // ── Rate limiting ───────────────────────────────────────────────

    #[test]
    fn sustained_rate_above_limit_blocks() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![limited("s1", 100, true)]);
        let start = Instant::now();
        let mut blocked = 0;
        // 200 records every 100ms = 2000 eps against a 100 eps limit
        for i in 0..20 {
            let now = start + Duration::from_millis(i * 100);
            let d = engine
                .evaluate_at(&snap, &enforcing(), &req("s1", "10.0.0.1", 200), EvalMode::Commit, now)
                .unwrap();
            if !d.allowed {
                assert_eq!(d.reason, AdmissionReason::RateLimit);
                assert!(d.retry_after.is_some());
                blocked += 1;
            }
        }
        assert_eq!(blocked, 20);
    }

    #[test]
    fn rate_at_limit_never_blocks() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![limited("s1", 100, true)]);
        let start = Instant::now();
        // 10 records every 100ms = exactly 100 eps
        for i in 0..100 {
            let now = start + Duration::from_millis(i * 100);
            let d = engine
                .evaluate_at(&snap, &enforcing(), &req("s1", "10.0.0.1", 10), EvalMode::Commit, now)
                .unwrap();
            assert!(d.allowed, "blocked at iteration {i}");
            assert_eq!(d.reason, AdmissionReason::Ok);
        }
    }

    #[test]
    fn burst_then_block_then_recover() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![limited("s1", 50, true)]);
        let t0 = Instant::now();
        let flags = enforcing();
        let r = req("s1", "10.0.0.1", 50);
        assert!(engine.evaluate_at(&snap, &flags, &r, EvalMode::Commit, t0).unwrap().allowed);
        assert!(!engine.evaluate_at(&snap, &flags, &r, EvalMode::Commit, t0).unwrap().allowed);
        let later = t0 + Duration::from_secs(1);
        assert!(engine.evaluate_at(&snap, &flags, &r, EvalMode::Commit, later).unwrap().allowed);
    }

    #[test]
    fn overage_without_block_is_admitted_and_flagged() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![limited("s1", 10, false)]);
        let t0 = Instant::now();
        let d = engine
            .evaluate_at(&snap, &enforcing(), &req("s1", "10.0.0.1", 50), EvalMode::Commit, t0)
            .unwrap();
        assert!(d.allowed);
        assert!(d.over_limit);
        assert_eq!(d.reason, AdmissionReason::Ok);
    }

    #[test]
    fn bucket_resets_when_max_eps_changes() {
        let engine = AdmissionEngine::new();
        let t0 = Instant::now();
        let snap = make_snapshot(vec![limited("s1", 10, true)]);
        let flags = enforcing();
        assert!(engine
            .evaluate_at(&snap, &flags, &req("s1", "10.0.0.1", 10), EvalMode::Commit, t0)
            .unwrap()
            .allowed);

        let raised = make_snapshot(vec![limited("s1", 100, true)]);
        let d = engine
            .evaluate_at(&raised, &flags, &req("s1", "10.0.0.1", 100), EvalMode::Commit, t0)
            .unwrap();
        assert!(d.allowed, "new capacity should start full");
    }

    #[test]
    fn buckets_are_per_source() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![limited("a", 10, true), limited("b", 10, true)]);
        let t0 = Instant::now();
        let flags = enforcing();
        assert!(engine.evaluate_at(&snap, &flags, &req("a", "10.0.0.1", 10), EvalMode::Commit, t0).unwrap().allowed);
        assert!(!engine.evaluate_at(&snap, &flags, &req("a", "10.0.0.1", 1), EvalMode::Commit, t0).unwrap().allowed);
        assert!(engine.evaluate_at(&snap, &flags, &req("b", "10.0.0.1", 10), EvalMode::Commit, t0).unwrap().allowed);
        assert_eq!(engine.bucket_count(), 2);
    }

    #[test]
    fn dry_run_does_not_debit() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![limited("s1", 10, true)]);
        let t0 = Instant::now();
        let flags = enforcing();
        for _ in 0..5 {
            let d = engine
                .evaluate_at(&snap, &flags, &req("s1", "10.0.0.1", 10), EvalMode::DryRun, t0)
                .unwrap();
            assert!(d.allowed);
        }
        assert_eq!(engine.bucket_count(), 0);
        assert!(engine.evaluate_at(&snap, &flags, &req("s1", "10.0.0.1", 10), EvalMode::Commit, t0).unwrap().allowed);
        let dry = engine
            .evaluate_at(&snap, &flags, &req("s1", "10.0.0.1", 1), EvalMode::DryRun, t0)
            .unwrap();
        assert_eq!(dry.reason, AdmissionReason::RateLimit);
    }

    #[test]
    fn prune_drops_deleted_sources() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![limited("a", 10, true), limited("b", 10, true)]);
        let flags = enforcing();
        let _ = engine.evaluate(&snap, &flags, &req("a", "10.0.0.1", 1), EvalMode::Commit);
        let _ = engine.evaluate(&snap, &flags, &req("b", "10.0.0.1", 1), EvalMode::Commit);
        let after = make_snapshot(vec![limited("a", 10, true)]);
        assert_eq!(engine.prune(&after), 1);
        assert_eq!(engine.bucket_count(), 1);
    }

    #[test]
    fn poisoned_bucket_surfaces_error() {
        let engine = AdmissionEngine::new();
        let snap = make_snapshot(vec![limited("s1", 10, true)]);
        let flags = enforcing();
        let _ = engine.evaluate(&snap, &flags, &req("s1", "10.0.0.1", 1), EvalMode::Commit);
        let bucket = engine.bucket_for("s1", 10, Instant::now());
        let _ = std::thread::spawn(move || {
            let _guard = bucket.lock().unwrap();
            panic!("poison");
        })
        .join();
        let err = engine
            .evaluate(&snap, &flags, &req("s1", "10.0.0.1", 1), EvalMode::Commit)
            .unwrap_err();
        assert!(matches!(err, AdmissionError::BucketPoisoned { .. }));
    }
}
