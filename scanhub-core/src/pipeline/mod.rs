//! Result reconciliation: unpack, diff, load, reclassify.
//!
//! Every step re-checks for work already done before doing any, so a
//! resubmitted or double-delivered completion callback converges on the
//! same rows instead of duplicating them.

pub mod artifacts;
pub mod compare;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveTime, Utc};
use tracing::{debug, info, warn};

use scanhub_model::{
    Defect, DefectId, DefectKind, GroupId, GroupState, ReportDefect,
    ResultGroup, ResultId, Scan, ScanId, ScanResult, ScanState,
};

use crate::catalog::Catalog;
use crate::error::{HubError, Result};
use crate::external::{DefectDiffer, ResultArtifacts, TaskBroker};
use crate::persistence::{
    AttachOutcome, ResultStore, ScanStore, WaiverStore,
};
use crate::pipeline::compare::{DefectIdentity, groups_content_match};
use crate::versions::AnalyzerVersionCache;
use crate::waiving::WaiverStateMachine;

/// Consumes finished jobs: unpacks the result tarball, produces the
/// added/fixed diffs for differential scans, loads classified defect
/// records, and hands the scan to the state machine for its terminal state.
#[derive(Clone)]
pub struct ResultsPipeline {
    scans: Arc<dyn ScanStore>,
    results: Arc<dyn ResultStore>,
    waivers: Arc<dyn WaiverStore>,
    catalog: Arc<Catalog>,
    versions: AnalyzerVersionCache,
    artifacts: Arc<dyn ResultArtifacts>,
    differ: Arc<dyn DefectDiffer>,
    broker: Arc<dyn TaskBroker>,
    state: WaiverStateMachine,
}

impl std::fmt::Debug for ResultsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultsPipeline").finish_non_exhaustive()
    }
}

impl ResultsPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scans: Arc<dyn ScanStore>,
        results: Arc<dyn ResultStore>,
        waivers: Arc<dyn WaiverStore>,
        catalog: Arc<Catalog>,
        versions: AnalyzerVersionCache,
        artifacts: Arc<dyn ResultArtifacts>,
        differ: Arc<dyn DefectDiffer>,
        broker: Arc<dyn TaskBroker>,
        state: WaiverStateMachine,
    ) -> Self {
        Self {
            scans,
            results,
            waivers,
            catalog,
            versions,
            artifacts,
            differ,
            broker,
            state,
        }
    }

    /// Process a finished job. Failures never propagate to the caller;
    /// they are recorded on the scan through `FailScan`, because the
    /// submitting caller is long gone on this asynchronous path.
    pub async fn on_job_finished(&self, scan_id: ScanId) -> Result<()> {
        let scan = self.scans.get_scan(scan_id).await?;

        // a job already running when its scan got canceled finishes
        // naturally; drop the stale completion here
        if scan.state == ScanState::Canceled {
            info!(scan = %scan.id, "ignoring completion of a canceled scan");
            return Ok(());
        }
        if scan.is_failed() && !self.job_closed(&scan).await? {
            // failed scan, failed job: nothing to process
            return Ok(());
        }

        if let Err(err) = self.process(&scan).await {
            warn!(scan = %scan.id, "error while processing scan: {err}");
            self.state.fail_scan(scan_id, &err.to_string()).await?;
            return Ok(());
        }

        self.state.finish_scan(scan_id).await
    }

    /// Record a worker-reported failure on the scan.
    pub async fn on_job_failed(
        &self,
        scan_id: ScanId,
        reason: &str,
    ) -> Result<()> {
        self.state.fail_scan(scan_id, reason).await
    }

    async fn job_closed(&self, scan: &Scan) -> Result<bool> {
        let binding = self.scans.get_binding(scan.id).await?;
        let Some(job) = binding.job else {
            return Ok(false);
        };
        let Some(info) = self.broker.job_info(job).await? else {
            return Ok(false);
        };
        Ok(info.state == crate::external::JobState::Closed)
    }

    async fn process(&self, scan: &Scan) -> Result<()> {
        let binding = self.scans.get_binding(scan.id).await?;
        let job = binding.job.ok_or_else(|| {
            HubError::Pipeline(format!("scan {} has no job", scan.id))
        })?;

        self.artifacts.unpack_results(job, &scan.nvr).await?;

        let differential = scan.scan_type.can_have_base() && scan.base.is_some();
        if differential {
            self.generate_diffs(scan, job).await?;
        }

        let result_id = self.load(scan, job, differential).await?;

        if scan.scan_type.is_target() {
            self.reclassify_previously_waived(scan, result_id).await?;
        }
        Ok(())
    }

    /// Produce `added.js` and `fixed.js` next to the unpacked report.
    /// Skipped entirely when both already exist.
    async fn generate_diffs(
        &self,
        scan: &Scan,
        job: scanhub_model::JobId,
    ) -> Result<()> {
        if self.artifacts.has_diffs(job).await? {
            info!(scan = %scan.id, "diff artifacts already exist");
            return Ok(());
        }

        let base_id = scan.base.ok_or_else(|| {
            HubError::Pipeline(format!("scan {} has no base", scan.id))
        })?;
        let base = self.scans.get_scan(base_id).await?;
        let base_binding = self.scans.get_binding(base_id).await?;
        let base_job = base_binding.job.ok_or_else(|| {
            HubError::Pipeline(format!("base scan {base_id} has no job"))
        })?;

        if !self.artifacts.has_results(base_job, &base.nvr).await? {
            return Err(HubError::Pipeline(
                "base results do not exist".into(),
            ));
        }
        if !self.artifacts.has_results(job, &scan.nvr).await? {
            return Err(HubError::Pipeline(
                "target results do not exist".into(),
            ));
        }

        let base_report = self.artifacts.report_path(base_job, &base.nvr);
        let target_report = self.artifacts.report_path(job, &scan.nvr);

        // added = target minus base, fixed = base minus target
        self.differ
            .diff(
                &base_report,
                &target_report,
                &self.artifacts.added_path(job),
            )
            .await?;
        self.differ
            .diff(
                &target_report,
                &base_report,
                &self.artifacts.fixed_path(job),
            )
            .await?;
        Ok(())
    }

    /// Create the result row and classified defect records. Keyed on the
    /// scan binding: a second delivery finds the row and loads nothing.
    async fn load(
        &self,
        scan: &Scan,
        job: scanhub_model::JobId,
        differential: bool,
    ) -> Result<ResultId> {
        let report = self.artifacts.read_report(job, &scan.nvr).await?;

        let result = ScanResult {
            id: ResultId::new(),
            lines: report.scan.lines_processed,
            scanning_time: report
                .scan
                .time_elapsed_analysis
                .as_deref()
                .and_then(parse_scanning_time),
            submitted_at: Utc::now(),
            analyzers: report.scan.analyzers.clone(),
        };

        let result_id = match self
            .results
            .attach_result(scan.id, result)
            .await?
        {
            AttachOutcome::Created(id) => id,
            AttachOutcome::AlreadyLoaded(id) => {
                info!(scan = %scan.id, "result already loaded");
                return Ok(id);
            }
        };

        if !report.scan.analyzers.is_empty() && scan.environment != "auto" {
            self.versions
                .apply_versions(&scan.environment, &report.scan.analyzers)
                .await?;
        }

        if scan.is_baseline() {
            // baselines only feed diffs; their findings are never reviewed
            return Ok(result_id);
        }

        let mut loader = DefectLoader::new(result_id);
        if differential {
            let fixed = self.artifacts.read_fixed(job).await?.defects;
            let added = self.artifacts.read_added(job).await?.defects;
            let (fixed, added) = drop_overlap(fixed, added);
            loader.bucket(&self.catalog, fixed, DefectKind::Fixed).await?;
            loader.bucket(&self.catalog, added, DefectKind::New).await?;
        } else {
            loader
                .bucket(&self.catalog, report.defects, DefectKind::New)
                .await?;
        }
        loader.store(&*self.results).await?;
        Ok(result_id)
    }

    /// Spare humans a re-triage of an unchanged defect set: groups whose
    /// content matches the last waived run in the same (checker group,
    /// package, release) scope inherit that disposition. Best effort with
    /// a bias toward re-inspection.
    async fn reclassify_previously_waived(
        &self,
        scan: &Scan,
        result_id: ResultId,
    ) -> Result<()> {
        let Some(release) = scan.release else {
            return Ok(());
        };

        for group in self.results.groups_for_result(result_id).await? {
            if group.state != GroupState::NeedsInspection {
                continue;
            }
            if !self
                .waivers
                .live_waivers_for_group(group.id)
                .await?
                .is_empty()
            {
                continue;
            }
            let Some(waiver) = self
                .waivers
                .last_waiver_in_scope(
                    &group.checker_group,
                    scan.package,
                    release,
                    Some(group.id),
                )
                .await?
            else {
                continue;
            };

            let waived_group = self.results.get_group(waiver.group).await?;
            let waived_result =
                self.results.get_result(waived_group.result).await?;
            // any unresolved newer group in scope invalidates the match
            let newer = self
                .results
                .groups_in_scope_since(
                    &group.checker_group,
                    scan.package,
                    release,
                    waived_result.submitted_at,
                    group.id,
                )
                .await?;
            if newer
                .iter()
                .any(|g| g.state == GroupState::NeedsInspection)
            {
                debug!(group = %group.id, "newer unresolved group, keep for inspection");
                continue;
            }

            let ours = new_defects(
                &self.results.defects_for_group(group.id).await?,
            );
            let theirs = new_defects(
                &self.results.defects_for_group(waived_group.id).await?,
            );
            if !groups_content_match(&ours, &theirs) {
                continue;
            }

            let mut updated = group.clone();
            if waiver.kind.is_bug() {
                updated.state = GroupState::ContainsBug;
                self.results.update_group(&updated).await?;
            } else {
                updated.state = GroupState::PreviouslyWaived;
                updated.defect_kind = DefectKind::PreviouslyWaived;
                self.results.update_group(&updated).await?;
                self.results
                    .set_defect_states(
                        group.id,
                        DefectKind::PreviouslyWaived,
                    )
                    .await?;
            }
            info!(
                group = %group.id,
                checker_group = %group.checker_group,
                "group matches previously waived run"
            );
        }
        Ok(())
    }
}

fn new_defects(defects: &[Defect]) -> Vec<Defect> {
    defects
        .iter()
        .filter(|d| d.state == DefectKind::New)
        .cloned()
        .collect()
}

/// Drop defects appearing in both diff outputs. Added and fixed are
/// disjoint by construction (target−base vs base−target); an overlap means
/// contradictory inputs and must not be double counted.
fn drop_overlap(
    fixed: Vec<ReportDefect>,
    added: Vec<ReportDefect>,
) -> (Vec<ReportDefect>, Vec<ReportDefect>) {
    use std::collections::HashSet;

    let fixed_ids: HashSet<_> =
        fixed.iter().map(report_defect_identity).collect();
    let added_ids: HashSet<_> =
        added.iter().map(report_defect_identity).collect();
    let overlap: HashSet<_> =
        fixed_ids.intersection(&added_ids).cloned().collect();
    if overlap.is_empty() {
        return (fixed, added);
    }
    warn!(
        count = overlap.len(),
        "defects present in both added and fixed sets; ignoring them"
    );
    let fixed = fixed
        .into_iter()
        .filter(|d| !overlap.contains(&report_defect_identity(d)))
        .collect();
    let added = added
        .into_iter()
        .filter(|d| !overlap.contains(&report_defect_identity(d)))
        .collect();
    (fixed, added)
}

fn report_defect_identity(defect: &ReportDefect) -> DefectIdentity {
    DefectIdentity {
        checker: defect.checker.clone(),
        key_event: defect.key_event_idx,
        events: defect
            .events
            .iter()
            .map(|evt| {
                (
                    evt.file_name.clone(),
                    evt.line,
                    evt.event.clone(),
                    evt.message.clone(),
                )
            })
            .collect(),
    }
}

/// Buckets report defects into result groups by checker group.
struct DefectLoader {
    result: ResultId,
    groups: Vec<ResultGroup>,
    index: HashMap<(String, DefectKind), usize>,
    defects: Vec<Defect>,
}

impl DefectLoader {
    fn new(result: ResultId) -> Self {
        Self {
            result,
            groups: Vec::new(),
            index: HashMap::new(),
            defects: Vec::new(),
        }
    }

    async fn bucket(
        &mut self,
        catalog: &Arc<Catalog>,
        defects: Vec<ReportDefect>,
        kind: DefectKind,
    ) -> Result<()> {
        for defect in defects {
            if defect.is_internal_warning() {
                continue;
            }
            // truncated the way the persistence layer stores checker names
            let checker: String =
                defect.checker.chars().take(64).collect();
            let group_name = catalog.checker_group(&checker).await?;

            let key = (group_name.clone(), kind);
            let idx = match self.index.get(&key) {
                Some(idx) => *idx,
                None => {
                    let seeded = ResultGroup {
                        id: GroupId::new(),
                        result: self.result,
                        checker_group: group_name,
                        defect_kind: kind,
                        state: match kind {
                            DefectKind::New => GroupState::NeedsInspection,
                            DefectKind::Fixed => GroupState::Info,
                            _ => GroupState::Unknown,
                        },
                        defects_count: 0,
                    };
                    self.groups.push(seeded);
                    self.index.insert(key, self.groups.len() - 1);
                    self.groups.len() - 1
                }
            };
            self.groups[idx].defects_count += 1;

            self.defects.push(Defect {
                id: DefectId::new(),
                group: self.groups[idx].id,
                checker,
                order: None,
                annotation: defect.annotation,
                cwe: defect.cwe,
                key_event: defect.key_event_idx,
                function: defect
                    .function
                    .map(|f| f.chars().take(128).collect()),
                defect_identifier: defect.defect_identifier,
                state: kind,
                events: defect.events,
            });
        }
        Ok(())
    }

    async fn store(mut self, results: &dyn ResultStore) -> Result<()> {
        for group in &mut self.groups {
            // a fixed bucket that ended up empty means nothing to show
            if group.defects_count == 0
                && group.defect_kind == DefectKind::Fixed
            {
                group.state = GroupState::Passed;
            }
            results.insert_group(group.clone()).await?;
        }
        results.insert_defects(self.defects).await?;
        for group in &self.groups {
            results.assign_defect_orders(group.id).await?;
        }
        Ok(())
    }
}

/// Parse the scanner's `HH:MM:SS` elapsed-analysis stamp into seconds.
fn parse_scanning_time(raw: &str) -> Option<i64> {
    let time = NaiveTime::parse_from_str(raw, "%H:%M:%S").ok()?;
    use chrono::Timelike;
    Some(i64::from(time.num_seconds_from_midnight()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanning_time_parses_to_seconds() {
        assert_eq!(parse_scanning_time("00:03:17"), Some(197));
        assert_eq!(parse_scanning_time("01:00:00"), Some(3600));
        assert_eq!(parse_scanning_time("bogus"), None);
    }

    #[test]
    fn overlapping_defects_are_dropped_from_both_sets() {
        let shared = ReportDefect {
            checker: "LEAK".into(),
            annotation: None,
            cwe: None,
            defect_identifier: None,
            function: None,
            key_event_idx: 0,
            events: vec![scanhub_model::ReportEvent {
                file_name: "a.c".into(),
                line: 1,
                column: None,
                event: "alloc".into(),
                message: "m".into(),
                verbosity_level: None,
            }],
        };
        let mut only_added = shared.clone();
        only_added.checker = "OVERRUN".into();

        let (fixed, added) =
            drop_overlap(vec![shared.clone()], vec![shared, only_added]);
        assert!(fixed.is_empty());
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].checker, "OVERRUN");
    }
}
