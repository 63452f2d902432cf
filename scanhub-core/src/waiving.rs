//! The scan and result-group lifecycle owner.
//!
//! Every scan state transition in the system goes through this service so
//! the no-op guard and the exactly-once state-change notification hold
//! everywhere. It also owns waiver application and invalidation, including
//! the finalization that closes a scan once its last group is dispositioned.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use scanhub_model::{
    DefectKind, GroupId, GroupState, Scan, ScanId, ScanState, TrackerRef,
    Waiver, WaiverId, WaiverKind, WaiverLogAction, WaivingLog,
};

use crate::error::{HubError, Result};
use crate::external::{ScanNotifier, TaskBroker};
use crate::persistence::{ResultStore, ScanStore, WaiverStore};

/// Stateless service owning scan/group state transitions and waivers.
#[derive(Clone)]
pub struct WaiverStateMachine {
    scans: Arc<dyn ScanStore>,
    results: Arc<dyn ResultStore>,
    waivers: Arc<dyn WaiverStore>,
    broker: Arc<dyn TaskBroker>,
    notifier: Arc<dyn ScanNotifier>,
}

impl std::fmt::Debug for WaiverStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaiverStateMachine").finish_non_exhaustive()
    }
}

impl WaiverStateMachine {
    pub fn new(
        scans: Arc<dyn ScanStore>,
        results: Arc<dyn ResultStore>,
        waivers: Arc<dyn WaiverStore>,
        broker: Arc<dyn TaskBroker>,
        notifier: Arc<dyn ScanNotifier>,
    ) -> Self {
        Self {
            scans,
            results,
            waivers,
            broker,
            notifier,
        }
    }

    /// Transition a scan, skipping silently when the state would not
    /// change. The notification fires exactly once per real transition.
    pub async fn set_state(
        &self,
        scan_id: ScanId,
        new: ScanState,
    ) -> Result<Option<Scan>> {
        let mut scan = self.scans.get_scan(scan_id).await?;
        let old = scan.state;
        if old == new {
            return Ok(None);
        }
        scan.state = new;
        self.scans.update_scan(&scan).await?;
        self.notifier.scan_state_changed(&scan, old, new).await;
        Ok(Some(scan))
    }

    /// Queue a freshly created scan. A scan superseded between creation
    /// and dispatch stays CANCELED instead of being resurrected.
    pub async fn mark_queued(&self, scan_id: ScanId) -> Result<()> {
        let scan = self.scans.get_scan(scan_id).await?;
        if scan.state != ScanState::Init {
            debug!(scan = %scan.id, state = %scan.state, "not queueing");
            return Ok(());
        }
        self.set_state(scan_id, ScanState::Queued).await?;
        Ok(())
    }

    pub async fn mark_scanning(&self, scan_id: ScanId) -> Result<()> {
        self.mark_running(scan_id, ScanState::Scanning).await
    }

    pub async fn mark_base_scanning(&self, scan_id: ScanId) -> Result<()> {
        self.mark_running(scan_id, ScanState::BaseScanning).await
    }

    /// Worker-reported "started executing" transitions; stale reports for
    /// scans that already reached a terminal state are dropped.
    async fn mark_running(
        &self,
        scan_id: ScanId,
        state: ScanState,
    ) -> Result<()> {
        let scan = self.scans.get_scan(scan_id).await?;
        if !scan.is_in_progress() {
            debug!(scan = %scan.id, state = %scan.state, "stale worker report");
            return Ok(());
        }
        self.set_state(scan_id, state).await?;
        Ok(())
    }

    /// Record a failure on the scan. Target scans drop out of the enabled
    /// chain and the most recent successful ancestor takes their place; a
    /// failing baseline also fails its waiting target scan.
    pub async fn fail_scan(&self, scan_id: ScanId, reason: &str) -> Result<()> {
        let Some(scan) = self.set_state(scan_id, ScanState::Failed).await?
        else {
            return Ok(());
        };
        warn!(scan = %scan.id, nvr = %scan.nvr, reason, "scan failed");

        if scan.scan_type.is_target() {
            let mut updated = scan.clone();
            updated.enabled = false;
            self.scans.update_scan(&updated).await?;
            self.enable_last_successful(&updated).await?;
        }

        let binding = self.scans.get_binding(scan_id).await?;
        if let Some(job) = binding.job {
            self.broker
                .set_job_note(job, &format!("Scan failed due to: {reason}"))
                .await?;
        }

        if scan.is_baseline() {
            if let Some(target) = self.scans.scan_with_base(scan_id).await? {
                Box::pin(self.fail_scan(
                    target.id,
                    &format!("base scan {} failed", scan.nvr),
                ))
                .await?;
            }
        }
        Ok(())
    }

    /// Cancel a superseded or withdrawn scan. The underlying job is only
    /// cancelled while still pre-execution; a job already running finishes
    /// naturally and its late completion is ignored against the CANCELED
    /// state.
    pub async fn cancel_scan(&self, scan_id: ScanId) -> Result<Scan> {
        let scan = match self.set_state(scan_id, ScanState::Canceled).await? {
            Some(scan) => scan,
            None => self.scans.get_scan(scan_id).await?,
        };
        self.cancel_side_effects(&scan).await?;
        Ok(scan)
    }

    /// Finish the cancellation of scans the submission transaction already
    /// flipped to CANCELED: emit the notification from the pre-cancel
    /// snapshot and run the side effects that cannot live inside the
    /// transaction (job cancellation, baseline cascade). Chain bookkeeping
    /// already happened in the transaction.
    pub async fn finalize_obsolete(&self, before: Scan) -> Result<()> {
        if before.state != ScanState::Canceled {
            let mut canceled = before.clone();
            canceled.state = ScanState::Canceled;
            self.notifier
                .scan_state_changed(&canceled, before.state, ScanState::Canceled)
                .await;
        }
        if let Ok(binding) = self.scans.get_binding(before.id).await {
            if let Some(job) = binding.job {
                let cancelled = self.broker.cancel_job(job).await?;
                if !cancelled {
                    info!(%job, "job already executing, letting it finish");
                }
            }
        }
        if let Some(base_id) = before.base {
            let base = self.scans.get_scan(base_id).await?;
            if base.is_in_progress() {
                self.cancel_scan(base_id).await?;
            }
        }
        Ok(())
    }

    async fn cancel_side_effects(&self, scan: &Scan) -> Result<()> {
        if let Ok(binding) = self.scans.get_binding(scan.id).await {
            if let Some(job) = binding.job {
                let cancelled = self.broker.cancel_job(job).await?;
                if !cancelled {
                    info!(%job, "job already executing, letting it finish");
                }
            }
        }

        if scan.scan_type.is_target() {
            if scan.enabled {
                let mut updated = scan.clone();
                updated.enabled = false;
                self.scans.update_scan(&updated).await?;
            }
            self.enable_last_successful(scan).await?;
            if let Some(base_id) = scan.base {
                let base = self.scans.get_scan(base_id).await?;
                if base.is_in_progress() {
                    Box::pin(self.cancel_scan(base_id)).await?;
                }
            }
        }
        Ok(())
    }

    /// Walk the chain toward older scans and re-enable the most recent one
    /// that finished well.
    pub async fn enable_last_successful(&self, from: &Scan) -> Result<()> {
        let mut cursor = Some(from.clone());
        while let Some(scan) = cursor {
            if scan.state.finished_well() {
                if !scan.enabled {
                    let mut updated = scan.clone();
                    updated.enabled = true;
                    self.scans.update_scan(&updated).await?;
                }
                return Ok(());
            }
            cursor = match scan.child {
                Some(child) => Some(self.scans.get_scan(child).await?),
                None => None,
            };
        }
        Ok(())
    }

    /// Derive the terminal state once the pipeline has loaded a result.
    pub async fn finish_scan(&self, scan_id: ScanId) -> Result<()> {
        let mut scan = self.scans.get_scan(scan_id).await?;
        scan.last_access = Utc::now();
        self.scans.update_scan(&scan).await?;

        if scan.is_baseline() {
            self.set_state(scan_id, ScanState::Finished).await?;
            return Ok(());
        }

        let binding = self.scans.get_binding(scan_id).await?;
        let result = binding.result.ok_or_else(|| {
            HubError::Pipeline(format!(
                "scan {scan_id} finished without a loaded result"
            ))
        })?;
        let groups = self.results.groups_for_result(result).await?;
        let unwaived = groups
            .iter()
            .any(|g| g.state == GroupState::NeedsInspection);
        let has_bugs =
            groups.iter().any(|g| g.state == GroupState::ContainsBug);

        let state = if unwaived {
            ScanState::NeedsInspection
        } else if has_bugs {
            // no new findings to review, but groups flagged from prior runs
            ScanState::BugConfirmed
        } else {
            ScanState::Passed
        };
        self.set_state(scan_id, state).await?;
        Ok(())
    }

    /// Record a waiver on a group. Non-comment waivers deactivate any prior
    /// active waiver, pull previously-dormant groups back to life, and
    /// finalize the scan when its last unresolved group gets dispositioned.
    pub async fn apply_waiver(
        &self,
        group_id: GroupId,
        kind: WaiverKind,
        message: &str,
        user: &str,
        tracker: Option<TrackerRef>,
    ) -> Result<Waiver> {
        let mut group = self.results.get_group(group_id).await?;
        let scan = self.results.scan_for_group(group_id).await?;

        // a previously-dormant group becomes live again once touched
        if kind != WaiverKind::Comment
            && (group.state == GroupState::PreviouslyWaived
                || group.defect_kind == DefectKind::PreviouslyWaived)
        {
            group.state = GroupState::NeedsInspection;
            group.defect_kind = DefectKind::New;
            self.results.update_group(&group).await?;
            self.results
                .set_defect_states(group_id, DefectKind::New)
                .await?;
        }

        let prior = self.waivers.live_waivers_for_group(group_id).await?;
        let waiver = Waiver {
            id: WaiverId::new(),
            group: group_id,
            kind,
            message: message.to_string(),
            user: user.to_string(),
            date: Utc::now(),
            is_active: kind != WaiverKind::Comment,
            is_deleted: false,
            tracker,
        };
        self.waivers.insert_waiver(waiver.clone()).await?;

        if kind == WaiverKind::Comment {
            self.log_action(&waiver, WaiverLogAction::New, user).await?;
            return Ok(waiver);
        }

        let action = if prior.is_empty() {
            WaiverLogAction::New
        } else {
            WaiverLogAction::Rewaive
        };
        for mut old in prior {
            old.is_active = false;
            self.waivers.update_waiver(&old).await?;
        }
        self.log_action(&waiver, action, user).await?;

        group.state = if kind.is_bug() {
            GroupState::ContainsBug
        } else {
            GroupState::Waived
        };
        self.results.update_group(&group).await?;

        let mut touched = scan.clone();
        touched.last_access = Utc::now();
        self.scans.update_scan(&touched).await?;

        self.finalize_if_processed(&scan).await?;
        Ok(waiver)
    }

    /// Soft-delete a waiver. A waived scan whose group loses its last
    /// active waiver reopens as DISPUTED.
    pub async fn invalidate_waiver(
        &self,
        waiver_id: WaiverId,
        user: &str,
    ) -> Result<()> {
        let mut waiver = self.waivers.get_waiver(waiver_id).await?;
        if waiver.is_deleted {
            return Err(HubError::Conflict(format!(
                "waiver {waiver_id} is already deleted"
            )));
        }
        waiver.is_deleted = true;
        waiver.is_active = false;
        self.waivers.update_waiver(&waiver).await?;
        self.log_action(&waiver, WaiverLogAction::Delete, user)
            .await?;

        let remaining =
            self.waivers.live_waivers_for_group(waiver.group).await?;
        if remaining.is_empty() {
            let mut group = self.results.get_group(waiver.group).await?;
            if group.state.is_processed() {
                group.state = GroupState::NeedsInspection;
                self.results.update_group(&group).await?;
            }
            let mut scan = self.results.scan_for_group(waiver.group).await?;
            scan.last_access = Utc::now();
            self.scans.update_scan(&scan).await?;
            if matches!(
                scan.state,
                ScanState::Waived | ScanState::BugConfirmed
            ) {
                self.set_state(scan.id, ScanState::Disputed).await?;
            }
        }
        Ok(())
    }

    /// When no NEEDS_INSPECTION group is left, the scan closes as WAIVED or
    /// BUG_CONFIRMED.
    async fn finalize_if_processed(&self, scan: &Scan) -> Result<()> {
        let binding = self.scans.get_binding(scan.id).await?;
        let Some(result) = binding.result else {
            return Ok(());
        };
        let groups = self.results.groups_for_result(result).await?;
        if groups
            .iter()
            .any(|g| g.state == GroupState::NeedsInspection)
        {
            return Ok(());
        }
        let state = if groups
            .iter()
            .any(|g| g.state == GroupState::ContainsBug)
        {
            ScanState::BugConfirmed
        } else {
            ScanState::Waived
        };
        self.set_state(scan.id, state).await?;
        Ok(())
    }

    async fn log_action(
        &self,
        waiver: &Waiver,
        action: WaiverLogAction,
        user: &str,
    ) -> Result<()> {
        self.waivers
            .append_log(WaivingLog {
                waiver: waiver.id,
                action,
                user: user.to_string(),
                date: Utc::now(),
            })
            .await
    }
}
