use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use domain::admission::flags::{FeatureFlags, FlagPatch};
use domain::audit::change::{ChangeActor, ChangeEntry};
use domain::common::error::DomainError;

use crate::change_history::ChangeHistory;

const FLAGS_TARGET: &str = "feature_flags";

/// Runtime admission switches.
///
/// Reads are a single atomic load. Writers are serialized so the
/// before/after pair in each change entry is exact.
pub struct FeatureFlagService {
    flags: ArcSwap<FeatureFlags>,
    write_lock: Mutex<()>,
    history: Arc<ChangeHistory>,
}

impl FeatureFlagService {
    pub fn new(initial: FeatureFlags, history: Arc<ChangeHistory>) -> Self {
        Self {
            flags: ArcSwap::from_pointee(initial),
            write_lock: Mutex::new(()),
            history,
        }
    }

    pub fn get(&self) -> FeatureFlags {
        **self.flags.load()
    }

    /// Apply a partial update. Every call is recorded, including no-op
    /// patches, so the history mirrors the API traffic.
    pub fn update(&self, patch: &FlagPatch, actor: ChangeActor) -> Result<FeatureFlags, DomainError> {
        if patch.is_empty() {
            return Err(DomainError::InvalidInput(
                "patch must set at least one flag".to_string(),
            ));
        }
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let before = self.get();
        let after = patch.apply(before);
        let changed = patch.changed_names(before);
        self.flags.store(Arc::new(after));

        self.history.record(ChangeEntry::new(
            actor,
            "update_feature_flags",
            FLAGS_TARGET,
            serde_json::to_value(before).unwrap_or_default(),
            serde_json::to_value(after).unwrap_or_default(),
        ));
        if changed.is_empty() {
            tracing::info!("feature flag patch applied with no effective change");
        } else {
            tracing::warn!(
                changed = ?changed,
                http_enabled = after.http_enabled,
                udp_enabled = after.udp_enabled,
                log_only = after.log_only,
                fail_open = after.fail_open,
                "feature flags changed"
            );
        }
        Ok(after)
    }

    /// Newest first.
    pub fn history(&self, limit: usize) -> Vec<ChangeEntry> {
        self.history.recent(limit, Some(FLAGS_TARGET))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_service() -> FeatureFlagService {
        FeatureFlagService::new(FeatureFlags::default(), Arc::new(ChangeHistory::default()))
    }

    #[test]
    fn defaults_are_safe_rollout_posture() {
        let flags = make_service().get();
        assert!(!flags.http_enabled);
        assert!(!flags.udp_enabled);
        assert!(flags.log_only);
        assert!(flags.fail_open);
    }

    #[test]
    fn partial_update_keeps_other_flags() {
        let svc = make_service();
        let after = svc
            .update(
                &FlagPatch {
                    http_enabled: Some(true),
                    ..FlagPatch::default()
                },
                ChangeActor::Api("ops".into()),
            )
            .unwrap();
        assert!(after.http_enabled);
        assert!(after.log_only);
        assert_eq!(svc.get(), after);
    }

    #[test]
    fn empty_patch_is_rejected() {
        let svc = make_service();
        assert!(matches!(
            svc.update(&FlagPatch::default(), ChangeActor::Cli),
            Err(DomainError::InvalidInput(_))
        ));
        assert!(svc.history(10).is_empty());
    }

    #[test]
    fn every_update_appends_history() {
        let svc = make_service();
        let enable = FlagPatch {
            log_only: Some(false),
            ..FlagPatch::default()
        };
        svc.update(&enable, ChangeActor::Cli).unwrap();
        svc.update(&enable, ChangeActor::Cli).unwrap();

        let history = svc.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].before["log_only"], serde_json::json!(true));
        assert_eq!(history[1].after["log_only"], serde_json::json!(false));
        assert_eq!(history[0].before, history[0].after);
    }
}
