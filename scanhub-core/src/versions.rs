//! Per-environment cache of installed analyzer versions.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use scanhub_config::ScanningConfig;
use scanhub_model::{AnalyzerVersionPair, Profile};

use crate::error::Result;
use crate::external::JobSpec;
use crate::persistence::VersionStore;

/// Worker method that probes an environment and reports analyzer versions.
pub const VERSION_RETRIEVER_METHOD: &str = "AnalyzerVersionRetriever";

/// TTL-guarded snapshot of analyzer versions per build environment.
///
/// The snapshot drives base-reuse decisions; a stale or missing snapshot
/// triggers a probe sub-job before any reuse decision is trusted.
#[derive(Clone)]
pub struct AnalyzerVersionCache {
    store: Arc<dyn VersionStore>,
    config: ScanningConfig,
}

impl std::fmt::Debug for AnalyzerVersionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerVersionCache")
            .field("ttl_hours", &self.config.version_cache_ttl_hours)
            .finish_non_exhaustive()
    }
}

impl AnalyzerVersionCache {
    pub fn new(store: Arc<dyn VersionStore>, config: ScanningConfig) -> Self {
        Self { store, config }
    }

    /// An environment with no recorded refresh is always stale.
    pub async fn is_stale(&self, environment: &str) -> Result<bool> {
        let Some(last) = self.store.last_refreshed(environment).await? else {
            debug!(environment, "no version check recorded yet");
            return Ok(true);
        };
        let ttl = Duration::hours(self.config.version_cache_ttl_hours);
        Ok(last + ttl <= Utc::now())
    }

    /// Currently cached (analyzer, version) set for the environment.
    pub async fn snapshot(
        &self,
        environment: &str,
    ) -> Result<Vec<AnalyzerVersionPair>> {
        let mut pairs: Vec<_> = self
            .store
            .snapshot(environment)
            .await?
            .into_iter()
            .map(|entry| AnalyzerVersionPair {
                name: entry.analyzer,
                version: entry.version,
            })
            .collect();
        pairs.sort();
        Ok(pairs)
    }

    /// Replace the environment's snapshot with what a finished run (or a
    /// probe job) reported. Clear-then-repopulate happens atomically in the
    /// store; last write wins between concurrent refreshes.
    pub async fn apply_versions(
        &self,
        environment: &str,
        versions: &[AnalyzerVersionPair],
    ) -> Result<()> {
        info!(
            environment,
            analyzers = versions.len(),
            "refreshing analyzer version snapshot"
        );
        self.store
            .replace_snapshot(environment, versions, Utc::now())
            .await
    }

    /// Job description for the probe sub-job that repopulates the snapshot.
    pub fn refresh_job(&self, environment: &str, profile: &Profile) -> JobSpec {
        let mut spec =
            JobSpec::new(VERSION_RETRIEVER_METHOD, "Refresh version cache.", "");
        spec.set_arg(
            "mock_config",
            serde_json::Value::String(environment.to_string()),
        );
        spec.set_arg(
            "analyzers",
            serde_json::Value::String(profile.analyzers.join(",")),
        );
        if let Some(args) = profile
            .scanner_args
            .as_ref()
            .filter(|args| !args.is_empty())
        {
            spec.set_arg(
                "scanner_args",
                serde_json::Value::String(args.clone()),
            );
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    use scanhub_model::AnalyzerVersionSnapshot;

    use super::*;

    #[derive(Default)]
    struct FakeVersionStore {
        snapshot: Mutex<Vec<AnalyzerVersionSnapshot>>,
        refreshed: Mutex<Option<DateTime<Utc>>>,
    }

    #[async_trait]
    impl VersionStore for FakeVersionStore {
        async fn snapshot(
            &self,
            _environment: &str,
        ) -> crate::error::Result<Vec<AnalyzerVersionSnapshot>> {
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn replace_snapshot(
            &self,
            environment: &str,
            versions: &[AnalyzerVersionPair],
            at: DateTime<Utc>,
        ) -> crate::error::Result<()> {
            *self.snapshot.lock().unwrap() = versions
                .iter()
                .map(|pair| AnalyzerVersionSnapshot {
                    environment: environment.to_string(),
                    analyzer: pair.name.clone(),
                    version: pair.version.clone(),
                    captured_at: at,
                })
                .collect();
            *self.refreshed.lock().unwrap() = Some(at);
            Ok(())
        }

        async fn last_refreshed(
            &self,
            _environment: &str,
        ) -> crate::error::Result<Option<DateTime<Utc>>> {
            Ok(*self.refreshed.lock().unwrap())
        }
    }

    fn cache_with(store: Arc<FakeVersionStore>) -> AnalyzerVersionCache {
        AnalyzerVersionCache::new(store, ScanningConfig::default())
    }

    #[tokio::test]
    async fn unrecorded_environment_is_stale() {
        let cache = cache_with(Arc::new(FakeVersionStore::default()));
        assert!(cache.is_stale("rhel-9-x86_64").await.unwrap());
    }

    #[tokio::test]
    async fn refresh_replaces_the_whole_set() {
        let store = Arc::new(FakeVersionStore::default());
        let cache = cache_with(store.clone());
        let first = vec![AnalyzerVersionPair {
            name: "cppcheck".into(),
            version: "2.9".into(),
        }];
        cache.apply_versions("env", &first).await.unwrap();
        let second = vec![AnalyzerVersionPair {
            name: "clang".into(),
            version: "15.0".into(),
        }];
        cache.apply_versions("env", &second).await.unwrap();

        let snapshot = cache.snapshot("env").await.unwrap();
        assert_eq!(snapshot, second, "old entries must not linger");
        assert!(!cache.is_stale("env").await.unwrap());
    }

    #[tokio::test]
    async fn refresh_job_carries_profile_selection() {
        let cache = cache_with(Arc::new(FakeVersionStore::default()));
        let profile = Profile {
            name: "default".into(),
            description: None,
            enabled: true,
            analyzers: vec!["gcc".into(), "cppcheck".into()],
            scanner_args: Some("--keep-going".into()),
        };
        let spec = cache.refresh_job("rhel-9-x86_64", &profile);
        assert_eq!(spec.method, VERSION_RETRIEVER_METHOD);
        assert_eq!(spec.arg_str("mock_config"), Some("rhel-9-x86_64"));
        assert_eq!(spec.arg_str("analyzers"), Some("gcc,cppcheck"));
    }
}
