//! End-to-end scheduling and reconciliation flows over the in-memory
//! stack.

mod support;

use scanhub_core::persistence::{ResultStore, ScanStore};
use scanhub_model::{
    DefectKind, GroupState, RequestState, ScanState, ScanType,
};
use support::TestHub;

#[tokio::test]
async fn differential_scan_lands_in_needs_inspection() {
    let hub = TestHub::new();

    let response = hub.submit_errata("pkgA-1.1-1", "pkgA-1.0-1").await;
    assert_eq!(response.status, RequestState::Ok);
    assert!(response.message.is_none());

    let scan = hub.scan_for_response(&response).await;
    // upstream version changed between base and target
    assert_eq!(scan.scan_type, ScanType::Rebase);
    assert_eq!(scan.state, ScanState::Queued);

    // worker asks for the baseline; none exists, so a sub-job is prepared
    let (base_id, base_job) = hub.prepare_base(&scan).await;
    hub.state.mark_base_scanning(scan.id).await.unwrap();

    hub.seed_report(base_job, "pkgA-1.0-1", &[]);
    hub.finish_job(base_id).await;
    let base = hub.store.get_scan(base_id).await.unwrap();
    assert_eq!(base.state, ScanState::Finished);
    assert!(!base.enabled, "baselines stay out of user history");

    hub.state.mark_scanning(scan.id).await.unwrap();
    let binding = hub.store.get_binding(scan.id).await.unwrap();
    hub.seed_report(
        binding.job.unwrap(),
        "pkgA-1.1-1",
        &[("X", 10), ("X", 20)],
    );
    hub.finish_job(scan.id).await;

    let scan = hub.store.get_scan(scan.id).await.unwrap();
    assert_eq!(scan.state, ScanState::NeedsInspection);

    let binding = hub.store.get_binding(scan.id).await.unwrap();
    let groups = hub
        .store
        .groups_for_result(binding.result.unwrap())
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.state, GroupState::NeedsInspection);
    assert_eq!(group.defect_kind, DefectKind::New);
    assert_eq!(group.defects_count, 2);
}

#[tokio::test]
async fn double_delivery_loads_exactly_one_result() {
    let hub = TestHub::new();

    let response = hub.submit_errata("pkgA-1.1-1", "pkgA-1.0-1").await;
    let scan = hub.scan_for_response(&response).await;
    let (base_id, base_job) = hub.prepare_base(&scan).await;
    hub.seed_report(base_job, "pkgA-1.0-1", &[]);
    hub.finish_job(base_id).await;

    let binding = hub.store.get_binding(scan.id).await.unwrap();
    hub.seed_report(binding.job.unwrap(), "pkgA-1.1-1", &[("X", 10)]);
    hub.finish_job(scan.id).await;

    let first = hub.store.get_binding(scan.id).await.unwrap();
    let result = first.result.unwrap();
    let groups_before =
        hub.store.groups_for_result(result).await.unwrap();
    let defects_before = hub
        .store
        .defects_for_group(groups_before[0].id)
        .await
        .unwrap();

    // the broker re-delivers the same completion event
    hub.pipeline.on_job_finished(scan.id).await.unwrap();

    let second = hub.store.get_binding(scan.id).await.unwrap();
    assert_eq!(second.result.unwrap(), result, "same result row");
    let groups_after = hub.store.groups_for_result(result).await.unwrap();
    assert_eq!(groups_after.len(), groups_before.len());
    let defects_after = hub
        .store
        .defects_for_group(groups_after[0].id)
        .await
        .unwrap();
    assert_eq!(defects_after.len(), defects_before.len());
}

#[tokio::test]
async fn newer_submission_obsoletes_the_running_scan() {
    let hub = TestHub::new();

    let first = hub.submit_errata("pkgA-1.1-1", "pkgA-1.0-1").await;
    let first_scan = hub.scan_for_response(&first).await;
    assert_eq!(first_scan.state, ScanState::Queued);

    let second = hub.submit_errata("pkgA-1.1-2", "pkgA-1.0-1").await;
    assert_eq!(second.status, RequestState::Ok);
    let second_scan = hub.scan_for_response(&second).await;

    let first_scan = hub.store.get_scan(first_scan.id).await.unwrap();
    assert_eq!(first_scan.state, ScanState::Canceled);
    assert!(!first_scan.enabled);
    assert_eq!(second_scan.state, ScanState::Queued);
    assert!(second_scan.enabled);

    // the cancellation notified exactly once
    let cancels: Vec<_> = hub
        .notifier
        .transitions_for(first_scan.id)
        .into_iter()
        .filter(|(_, new)| *new == ScanState::Canceled)
        .collect();
    assert_eq!(cancels, vec![(ScanState::Queued, ScanState::Canceled)]);
}

#[tokio::test]
async fn concurrent_submissions_leave_one_scan_in_progress() {
    let hub = TestHub::new();

    let (first, second) = tokio::join!(
        hub.submit_errata("pkgA-1.1-1", "pkgA-1.0-1"),
        hub.submit_errata("pkgA-1.1-2", "pkgA-1.0-1"),
    );
    assert_eq!(first.status, RequestState::Ok);
    assert_eq!(second.status, RequestState::Ok);

    let scans = hub
        .store
        .find_scans(&scanhub_core::persistence::ScanQuery::default())
        .await
        .unwrap();
    let in_progress = scans
        .iter()
        .filter(|scan| scan.state.is_in_progress())
        .count();
    assert_eq!(
        in_progress, 1,
        "exactly one scan per scope may be in progress: {scans:?}"
    );
}

#[tokio::test]
async fn finished_baseline_is_reused_when_versions_match() {
    let hub = TestHub::new();

    // first differential run produces a finished scan of pkgA-1.1-1
    let first = hub.submit_errata("pkgA-1.1-1", "pkgA-1.0-1").await;
    let first_scan = hub.scan_for_response(&first).await;
    let (base_id, base_job) = hub.prepare_base(&first_scan).await;
    hub.seed_report(base_job, "pkgA-1.0-1", &[]);
    hub.finish_job(base_id).await;
    let binding = hub.store.get_binding(first_scan.id).await.unwrap();
    hub.seed_report(binding.job.unwrap(), "pkgA-1.1-1", &[]);
    hub.finish_job(first_scan.id).await;
    assert_eq!(
        hub.store.get_scan(first_scan.id).await.unwrap().state,
        ScanState::Passed
    );

    // the next update diffs against pkgA-1.1-1: no fresh base needed
    let second = hub.submit_errata("pkgA-1.1-2", "pkgA-1.1-1").await;
    let second_scan = hub.scan_for_response(&second).await;
    let second_binding =
        hub.store.get_binding(second_scan.id).await.unwrap();
    let spec = hub
        .scheduler
        .ensure_base_scanned(second_scan.id, second_binding.job.unwrap())
        .await
        .unwrap();
    assert!(spec.is_none(), "prior scan serves as the baseline");
    let second_scan = hub.store.get_scan(second_scan.id).await.unwrap();
    assert_eq!(second_scan.base, Some(first_scan.id));
}

#[tokio::test]
async fn failed_baseline_fails_its_target() {
    let hub = TestHub::new();

    let response = hub.submit_errata("pkgA-1.1-1", "pkgA-1.0-1").await;
    let scan = hub.scan_for_response(&response).await;
    let (base_id, _base_job) = hub.prepare_base(&scan).await;

    hub.pipeline
        .on_job_failed(base_id, "build did not finish")
        .await
        .unwrap();

    assert_eq!(
        hub.store.get_scan(base_id).await.unwrap().state,
        ScanState::Failed
    );
    let target = hub.store.get_scan(scan.id).await.unwrap();
    assert_eq!(target.state, ScanState::Failed);

    // the target's failure reason references the baseline
    use scanhub_core::external::TaskBroker;
    let binding = hub.store.get_binding(scan.id).await.unwrap();
    let info = hub
        .broker
        .job_info(binding.job.unwrap())
        .await
        .unwrap()
        .unwrap();
    let note = info.note.unwrap_or_default();
    assert!(
        note.contains("base scan pkgA-1.0-1 failed"),
        "unexpected failure note: {note}"
    );
}

#[tokio::test]
async fn cancel_cascades_to_baseline_and_restores_the_chain() {
    let hub = TestHub::new();

    // a completed run holds the enabled head of the chain
    let first = hub.submit_errata("pkgA-1.1-1", "pkgA-1.0-1").await;
    let first_scan = hub.scan_for_response(&first).await;
    let (base_id, base_job) = hub.prepare_base(&first_scan).await;
    hub.seed_report(base_job, "pkgA-1.0-1", &[]);
    hub.finish_job(base_id).await;
    let binding = hub.store.get_binding(first_scan.id).await.unwrap();
    hub.seed_report(binding.job.unwrap(), "pkgA-1.1-1", &[]);
    hub.finish_job(first_scan.id).await;

    // a newer submission with an unscanned base is in flight
    let second = hub.submit_errata("pkgA-1.2-1", "pkgA-1.1-9").await;
    let second_scan = hub.scan_for_response(&second).await;
    let (second_base, _) = hub.prepare_base(&second_scan).await;
    hub.state
        .mark_base_scanning(second_scan.id)
        .await
        .unwrap();

    hub.state.cancel_scan(second_scan.id).await.unwrap();

    assert_eq!(
        hub.store.get_scan(second_scan.id).await.unwrap().state,
        ScanState::Canceled
    );
    assert_eq!(
        hub.store.get_scan(second_base).await.unwrap().state,
        ScanState::Canceled
    );
    let first_scan = hub.store.get_scan(first_scan.id).await.unwrap();
    assert!(
        first_scan.enabled,
        "most recent successful scan takes the enabled slot back"
    );
}

#[tokio::test]
async fn rescan_of_a_passed_scan_is_a_conflict() {
    let hub = TestHub::new();

    let response = hub.submit_errata("pkgA-1.1-1", "pkgA-1.0-1").await;
    let scan = hub.scan_for_response(&response).await;
    let (base_id, base_job) = hub.prepare_base(&scan).await;
    hub.seed_report(base_job, "pkgA-1.0-1", &[]);
    hub.finish_job(base_id).await;
    let binding = hub.store.get_binding(scan.id).await.unwrap();
    hub.seed_report(binding.job.unwrap(), "pkgA-1.1-1", &[]);
    hub.finish_job(scan.id).await;

    let err = hub
        .scheduler
        .rescan(scan.id, &TestHub::principal())
        .await
        .unwrap_err();
    assert!(
        matches!(err, scanhub_core::HubError::Conflict(_)),
        "expected conflict, got {err:?}"
    );
    assert!(err.to_string().contains("not supported"));
}

#[tokio::test]
async fn errata_state_is_queryable_through_the_mapping() {
    let hub = TestHub::new();

    let response = hub.submit_errata("pkgA-1.1-1", "pkgA-1.0-1").await;
    let state = hub
        .scheduler
        .errata_scan_state(response.id.unwrap())
        .await
        .unwrap();
    assert_eq!(state.status, RequestState::Ok);
    assert_eq!(state.state, Some(ScanState::Queued));
}
