//! Base-reuse decisions for differential scans.

use std::sync::Arc;

use tracing::{debug, info, warn};

use scanhub_config::ScanningConfig;
use scanhub_model::{AnalyzerVersionPair, Scan};

use crate::error::Result;
use crate::external::ResultArtifacts;
use crate::persistence::{ResultStore, ScanStore};
use crate::versions::AnalyzerVersionCache;

/// Outcome of resolving a differential scan's baseline.
#[derive(Clone, Debug)]
pub enum BaselineDecision {
    /// A finished prior scan is valid; diff against it directly.
    Reuse(Scan),
    /// A prior scan of the same NVR is still running; wait on it instead of
    /// scheduling a duplicate.
    WaitFor(Scan),
    /// No usable prior scan; a fresh baseline sub-job must run first.
    NeedsFreshScan,
}

/// Decides whether an existing scan of the base NVR can serve as the diff
/// baseline or a fresh baseline scan must be scheduled.
#[derive(Clone)]
pub struct BaseScanResolver {
    scans: Arc<dyn ScanStore>,
    results: Arc<dyn ResultStore>,
    versions: AnalyzerVersionCache,
    artifacts: Arc<dyn ResultArtifacts>,
    config: ScanningConfig,
}

impl std::fmt::Debug for BaseScanResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseScanResolver").finish_non_exhaustive()
    }
}

impl BaseScanResolver {
    pub fn new(
        scans: Arc<dyn ScanStore>,
        results: Arc<dyn ResultStore>,
        versions: AnalyzerVersionCache,
        artifacts: Arc<dyn ResultArtifacts>,
        config: ScanningConfig,
    ) -> Self {
        Self {
            scans,
            results,
            versions,
            artifacts,
            config,
        }
    }

    /// Find the most recent non-failed scan of `base_nvr` and decide
    /// whether it is reusable for diffing in `environment`.
    pub async fn resolve(
        &self,
        base_nvr: &str,
        environment: &str,
    ) -> Result<BaselineDecision> {
        let Some((scan, binding)) =
            self.scans.latest_binding_for_nvr(base_nvr, false).await?
        else {
            info!(base_nvr, "no prior scan of base");
            return Ok(BaselineDecision::NeedsFreshScan);
        };
        debug!(base_nvr, scan = %scan.id, "latest base binding");

        if scan.is_in_progress() && binding.result.is_none() {
            debug!(scan = %scan.id, "base scan still in progress, wait on it");
            return Ok(BaselineDecision::WaitFor(scan));
        }

        let Some(result_id) = binding.result else {
            // not in progress and not failed, yet no result: data-integrity
            // fault in a prior run, reschedule from scratch
            warn!(scan = %scan.id, "base scan has no result, rescheduling");
            return Ok(BaselineDecision::NeedsFreshScan);
        };

        let recorded = self.results.get_result(result_id).await?.analyzers;
        let current = self.versions.snapshot(environment).await?;
        if !analyzer_sets_match(
            &recorded,
            &current,
            &self.config.version_exempt_analyzers,
        ) {
            info!(scan = %scan.id, "analyzer configuration changed, rescan base");
            return Ok(BaselineDecision::NeedsFreshScan);
        }

        let Some(job) = binding.job else {
            warn!(scan = %scan.id, "base scan has no job attached");
            return Ok(BaselineDecision::NeedsFreshScan);
        };
        if !self.artifacts.has_results(job, &scan.nvr).await? {
            // defends against partially-failed prior runs
            warn!(scan = %scan.id, "base result artifact is missing");
            return Ok(BaselineDecision::NeedsFreshScan);
        }

        Ok(BaselineDecision::Reuse(scan))
    }
}

/// The pure reuse predicate: every non-exempt analyzer's version matches
/// exactly, exempt analyzers are checked for presence only, and neither set
/// may contain analyzers the other lacks.
pub fn analyzer_sets_match(
    recorded: &[AnalyzerVersionPair],
    current: &[AnalyzerVersionPair],
    exempt: &[String],
) -> bool {
    if recorded.len() != current.len() {
        return false;
    }
    for pair in recorded {
        let Some(other) = current.iter().find(|c| c.name == pair.name) else {
            return false;
        };
        if exempt.contains(&pair.name) {
            continue;
        }
        if pair.version != other.version {
            debug!(
                "{}-{} != {}-{}",
                pair.name, pair.version, other.name, other.version
            );
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(name: &str, version: &str) -> AnalyzerVersionPair {
        AnalyzerVersionPair {
            name: name.into(),
            version: version.into(),
        }
    }

    #[test]
    fn identical_sets_match() {
        let set = vec![pair("cppcheck", "2.9"), pair("clang", "15.0")];
        assert!(analyzer_sets_match(&set, &set, &[]));
    }

    #[test]
    fn version_drift_breaks_the_match() {
        let recorded = vec![pair("cppcheck", "2.9")];
        let current = vec![pair("cppcheck", "2.10")];
        assert!(!analyzer_sets_match(&recorded, &current, &[]));
    }

    #[test]
    fn exempt_analyzers_are_presence_only() {
        let recorded = vec![pair("gcc", "11.3.1"), pair("cppcheck", "2.9")];
        let current = vec![pair("gcc", "11.4.1"), pair("cppcheck", "2.9")];
        let exempt = vec!["gcc".to_string()];
        assert!(analyzer_sets_match(&recorded, &current, &exempt));
        // but a missing exempt analyzer still breaks the match
        let current_without = vec![pair("cppcheck", "2.9")];
        assert!(!analyzer_sets_match(&recorded, &current_without, &exempt));
    }

    #[test]
    fn equal_size_disjoint_sets_do_not_match() {
        let recorded = vec![pair("cppcheck", "2.9")];
        let current = vec![pair("shellcheck", "0.9")];
        assert!(!analyzer_sets_match(&recorded, &current, &[]));
    }
}
