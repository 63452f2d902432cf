//! Waiver application, invalidation, and scan finalization.

mod support;

use scanhub_core::persistence::{ResultStore, ScanStore};
use scanhub_model::{
    DefectKind, GroupId, GroupState, ScanId, ScanState, WaiverKind,
};
use support::TestHub;

/// Drive one differential scan to NEEDS_INSPECTION with a single
/// unresolved group and return (scan id, group id).
async fn scan_with_one_group(hub: &TestHub) -> (ScanId, GroupId) {
    let response = hub.submit_errata("pkgA-1.1-1", "pkgA-1.0-1").await;
    let scan = hub.scan_for_response(&response).await;
    let (base_id, base_job) = hub.prepare_base(&scan).await;
    hub.seed_report(base_job, "pkgA-1.0-1", &[]);
    hub.finish_job(base_id).await;
    let binding = hub.store.get_binding(scan.id).await.unwrap();
    hub.seed_report(binding.job.unwrap(), "pkgA-1.1-1", &[("X", 10)]);
    hub.finish_job(scan.id).await;

    let binding = hub.store.get_binding(scan.id).await.unwrap();
    let groups = hub
        .store
        .groups_for_result(binding.result.unwrap())
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    (scan.id, groups[0].id)
}

#[tokio::test]
async fn not_a_bug_waiver_closes_the_scan() {
    let hub = TestHub::new();
    let (scan_id, group_id) = scan_with_one_group(&hub).await;

    hub.state
        .apply_waiver(
            group_id,
            WaiverKind::NotABug,
            "false positive, guarded by caller",
            "reviewer",
            None,
        )
        .await
        .unwrap();

    let group = hub.store.get_group(group_id).await.unwrap();
    assert_eq!(group.state, GroupState::Waived);
    let scan = hub.store.get_scan(scan_id).await.unwrap();
    assert_eq!(scan.state, ScanState::Waived);
}

#[tokio::test]
async fn is_a_bug_waiver_confirms_the_bug() {
    let hub = TestHub::new();
    let (scan_id, group_id) = scan_with_one_group(&hub).await;

    let waiver = hub
        .state
        .apply_waiver(
            group_id,
            WaiverKind::IsABug,
            "real overflow, needs a respin",
            "reviewer",
            None,
        )
        .await
        .unwrap();

    let group = hub.store.get_group(group_id).await.unwrap();
    assert_eq!(group.state, GroupState::ContainsBug);
    let scan = hub.store.get_scan(scan_id).await.unwrap();
    assert_eq!(scan.state, ScanState::BugConfirmed);

    // retracting the verdict reopens the scan as disputed
    hub.state
        .invalidate_waiver(waiver.id, "lead")
        .await
        .unwrap();
    let scan = hub.store.get_scan(scan_id).await.unwrap();
    assert_eq!(scan.state, ScanState::Disputed);
}

#[tokio::test]
async fn invalidation_reopens_a_waived_scan() {
    let hub = TestHub::new();
    let (scan_id, group_id) = scan_with_one_group(&hub).await;

    let waiver = hub
        .state
        .apply_waiver(
            group_id,
            WaiverKind::NotABug,
            "false positive",
            "reviewer",
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        hub.store.get_scan(scan_id).await.unwrap().state,
        ScanState::Waived
    );

    hub.state
        .invalidate_waiver(waiver.id, "lead")
        .await
        .unwrap();

    let group = hub.store.get_group(group_id).await.unwrap();
    assert_eq!(group.state, GroupState::NeedsInspection);
    let scan = hub.store.get_scan(scan_id).await.unwrap();
    assert_eq!(scan.state, ScanState::Disputed);

    // re-waiving resolves the dispute
    hub.state
        .apply_waiver(
            group_id,
            WaiverKind::NotABug,
            "still a false positive",
            "reviewer",
            None,
        )
        .await
        .unwrap();
    let scan = hub.store.get_scan(scan_id).await.unwrap();
    assert_eq!(scan.state, ScanState::Waived);
}

#[tokio::test]
async fn comments_carry_no_waiving_semantics() {
    let hub = TestHub::new();
    let (scan_id, group_id) = scan_with_one_group(&hub).await;

    hub.state
        .apply_waiver(
            group_id,
            WaiverKind::Comment,
            "looked at this briefly, needs a second pair of eyes",
            "reviewer",
            None,
        )
        .await
        .unwrap();

    let group = hub.store.get_group(group_id).await.unwrap();
    assert_eq!(group.state, GroupState::NeedsInspection);
    assert_eq!(
        hub.store.get_scan(scan_id).await.unwrap().state,
        ScanState::NeedsInspection
    );
}

#[tokio::test]
async fn unchanged_defect_set_is_reclassified_as_previously_waived() {
    let hub = TestHub::new();

    // run one: waive the only group
    let (_, group_id) = scan_with_one_group(&hub).await;
    hub.state
        .apply_waiver(
            group_id,
            WaiverKind::NotABug,
            "false positive",
            "reviewer",
            None,
        )
        .await
        .unwrap();

    // run two: the respin diffs against the same base and reports the
    // exact same defect content
    let response = hub.submit_errata("pkgA-1.1-2", "pkgA-1.0-1").await;
    let scan = hub.scan_for_response(&response).await;
    let binding = hub.store.get_binding(scan.id).await.unwrap();
    let spec = hub
        .scheduler
        .ensure_base_scanned(scan.id, binding.job.unwrap())
        .await
        .unwrap();
    assert!(spec.is_none(), "run one's baseline is reused");

    hub.seed_report(binding.job.unwrap(), "pkgA-1.1-2", &[("X", 10)]);
    hub.finish_job(scan.id).await;

    let binding = hub.store.get_binding(scan.id).await.unwrap();
    let groups = hub
        .store
        .groups_for_result(binding.result.unwrap())
        .await
        .unwrap();
    let live: Vec<_> = groups
        .iter()
        .filter(|g| g.defect_kind == DefectKind::PreviouslyWaived)
        .collect();
    assert_eq!(live.len(), 1, "groups: {groups:?}");
    assert_eq!(live[0].state, GroupState::PreviouslyWaived);

    // nothing left to inspect, the scan closes without human review
    assert_eq!(
        hub.store.get_scan(scan.id).await.unwrap().state,
        ScanState::Passed
    );
}
