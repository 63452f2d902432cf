//! Shared fixture wiring the full service graph over the in-memory store,
//! broker, and fake worker-side collaborators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use scanhub_config::ScanningConfig;
use scanhub_core::baseline::BaseScanResolver;
use scanhub_core::catalog::Catalog;
use scanhub_core::error::{HubError, Result};
use scanhub_core::external::{
    BuildInfo, BuildSystem, DefectDiffer, JobState, ResultArtifacts,
    ScanNotifier, TaskBroker,
};
use scanhub_core::persistence::memory::{MemoryBroker, MemoryStore};
use scanhub_core::pipeline::ResultsPipeline;
use scanhub_core::scheduler::ScanScheduler;
use scanhub_core::scheduler::request::{
    ErrataResponse, ErrataSubmission, Principal,
};
use scanhub_core::versions::AnalyzerVersionCache;
use scanhub_core::waiving::WaiverStateMachine;
use scanhub_model::{
    AnalyzerVersionPair, ClientAnalyzer, JobId, MockEnvironment, Profile,
    Release, ReleaseId, ReleaseMapping, ReportDefect, ReportEvent,
    ReportMetadata, Scan, ScanId, ScanReport, ScanState, Tag,
};

pub const ENVIRONMENT: &str = "rhel-9-x86_64";
pub const RELEASE_STR: &str = "RHEL-9.2.0";

/// Report artifacts held in memory, keyed by the path the real
/// filesystem layout would use.
#[derive(Default)]
pub struct FakeArtifacts {
    reports: Mutex<HashMap<PathBuf, ScanReport>>,
}

impl FakeArtifacts {
    pub fn seed(&self, path: PathBuf, report: ScanReport) {
        self.reports.lock().unwrap().insert(path, report);
    }

    pub fn read(&self, path: &Path) -> Option<ScanReport> {
        self.reports.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl ResultArtifacts for FakeArtifacts {
    async fn unpack_results(&self, job: JobId, nvr: &str) -> Result<()> {
        if self.has_results(job, nvr).await? {
            return Ok(());
        }
        Err(HubError::Pipeline(format!("no result tarball for job {job}")))
    }

    async fn has_results(&self, job: JobId, nvr: &str) -> Result<bool> {
        Ok(self
            .reports
            .lock()
            .unwrap()
            .contains_key(&self.report_path(job, nvr)))
    }

    async fn has_diffs(&self, job: JobId) -> Result<bool> {
        let reports = self.reports.lock().unwrap();
        Ok(reports.contains_key(&self.added_path(job))
            && reports.contains_key(&self.fixed_path(job)))
    }

    fn report_path(&self, job: JobId, nvr: &str) -> PathBuf {
        PathBuf::from("/scratch")
            .join(job.to_string())
            .join(nvr)
            .join("scan-results.js")
    }

    fn added_path(&self, job: JobId) -> PathBuf {
        PathBuf::from("/scratch").join(job.to_string()).join("added.js")
    }

    fn fixed_path(&self, job: JobId) -> PathBuf {
        PathBuf::from("/scratch").join(job.to_string()).join("fixed.js")
    }

    async fn read_report(&self, job: JobId, nvr: &str) -> Result<ScanReport> {
        self.read(&self.report_path(job, nvr)).ok_or_else(|| {
            HubError::Pipeline(format!("missing report for job {job}"))
        })
    }

    async fn read_added(&self, job: JobId) -> Result<ScanReport> {
        self.read(&self.added_path(job)).ok_or_else(|| {
            HubError::Pipeline(format!("missing added diff for job {job}"))
        })
    }

    async fn read_fixed(&self, job: JobId) -> Result<ScanReport> {
        self.read(&self.fixed_path(job)).ok_or_else(|| {
            HubError::Pipeline(format!("missing fixed diff for job {job}"))
        })
    }
}

/// Differ over the fake artifact map: `out` receives the defects of `new`
/// that are absent from `old`.
pub struct FakeDiffer {
    artifacts: Arc<FakeArtifacts>,
}

impl FakeDiffer {
    pub fn new(artifacts: Arc<FakeArtifacts>) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl DefectDiffer for FakeDiffer {
    async fn diff(&self, old: &Path, new: &Path, out: &Path) -> Result<()> {
        let old_report = self.artifacts.read(old).ok_or_else(|| {
            HubError::Pipeline(format!("missing report {}", old.display()))
        })?;
        let new_report = self.artifacts.read(new).ok_or_else(|| {
            HubError::Pipeline(format!("missing report {}", new.display()))
        })?;
        let old_keys: Vec<String> = old_report
            .defects
            .iter()
            .map(|d| serde_json::to_string(d).unwrap())
            .collect();
        let defects = new_report
            .defects
            .into_iter()
            .filter(|d| {
                !old_keys.contains(&serde_json::to_string(d).unwrap())
            })
            .collect();
        self.artifacts.seed(
            out.to_path_buf(),
            ScanReport {
                scan: ReportMetadata::default(),
                defects,
            },
        );
        Ok(())
    }
}

/// Build system that knows every NVR.
#[derive(Default)]
pub struct FakeBuildSystem;

#[async_trait]
impl BuildSystem for FakeBuildSystem {
    async fn lookup_build(&self, nvr: &str) -> Result<Option<BuildInfo>> {
        Ok(Some(BuildInfo {
            nvr: nvr.to_string(),
            is_container: false,
            origin_tag: None,
        }))
    }
}

/// Records every state-change notification.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(ScanId, ScanState, ScanState)>>,
}

impl RecordingNotifier {
    pub fn transitions_for(&self, scan: ScanId) -> Vec<(ScanState, ScanState)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| *id == scan)
            .map(|(_, old, new)| (*old, *new))
            .collect()
    }
}

#[async_trait]
impl ScanNotifier for RecordingNotifier {
    async fn scan_state_changed(
        &self,
        scan: &Scan,
        old: ScanState,
        new: ScanState,
    ) {
        self.events.lock().unwrap().push((scan.id, old, new));
    }
}

pub struct TestHub {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<MemoryBroker>,
    pub artifacts: Arc<FakeArtifacts>,
    pub notifier: Arc<RecordingNotifier>,
    pub catalog: Arc<Catalog>,
    pub versions: AnalyzerVersionCache,
    pub scheduler: ScanScheduler,
    pub pipeline: ResultsPipeline,
    pub state: WaiverStateMachine,
    pub release: ReleaseId,
}

impl TestHub {
    pub fn new() -> Self {
        let config = ScanningConfig::default();
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let artifacts = Arc::new(FakeArtifacts::default());
        let differ = Arc::new(FakeDiffer::new(artifacts.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let build_system = Arc::new(FakeBuildSystem);

        let release = ReleaseId::new();
        store.put_release(Release {
            id: release,
            tag: "rhel-9.2".into(),
            product: "Red Hat Enterprise Linux 9".into(),
            version: "9.2".into(),
            active: true,
            parent: None,
        });
        store.put_environment(MockEnvironment {
            id: scanhub_model::EnvironmentId::new(),
            name: ENVIRONMENT.into(),
            enabled: true,
        });
        store.put_tag(Tag {
            name: "rhel-9.2-build".into(),
            environment: ENVIRONMENT.into(),
            release,
        });
        store.put_release_mapping(ReleaseMapping {
            release_pattern: r"^RHEL-(\d+)\.(\d+)".into(),
            template: "rhel-%s.%s-build".into(),
            priority: 1,
        });
        store.put_profile(Profile {
            name: "default".into(),
            description: None,
            enabled: true,
            analyzers: vec!["cppcheck".into()],
            scanner_args: None,
        });
        store.put_analyzer(ClientAnalyzer {
            analyzer: "cppcheck".into(),
            version: Some("2.9".into()),
            enabled: true,
            cli_name: "cppcheck".into(),
            build_append: Some("cppcheck".into()),
            build_append_args: None,
        });

        let catalog = Arc::new(Catalog::new(store.clone()));
        let versions =
            AnalyzerVersionCache::new(store.clone(), config.clone());
        let resolver = BaseScanResolver::new(
            store.clone(),
            store.clone(),
            versions.clone(),
            artifacts.clone(),
            config.clone(),
        );
        let state = WaiverStateMachine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            broker.clone(),
            notifier.clone(),
        );
        let scheduler = ScanScheduler::new(
            store.clone(),
            catalog.clone(),
            versions.clone(),
            resolver,
            broker.clone(),
            build_system,
            state.clone(),
            config.clone(),
        );
        let pipeline = ResultsPipeline::new(
            store.clone(),
            store.clone(),
            store.clone(),
            catalog.clone(),
            versions.clone(),
            artifacts.clone(),
            differ,
            broker.clone(),
            state.clone(),
        );

        Self {
            store,
            broker,
            artifacts,
            notifier,
            catalog,
            versions,
            scheduler,
            pipeline,
            state,
            release,
        }
    }

    pub fn principal() -> Principal {
        Principal {
            username: "qa-bot".into(),
            elevated: false,
        }
    }

    pub async fn submit_errata(
        &self,
        target: &str,
        base: &str,
    ) -> ErrataResponse {
        self.scheduler
            .handle_errata_request(
                ErrataSubmission {
                    target: target.into(),
                    base: base.into(),
                    release: RELEASE_STR.into(),
                    package_owner: "owner@example.com".into(),
                    advisory_id: "1234".into(),
                    external_scan_id: "77".into(),
                },
                &Self::principal(),
            )
            .await
    }

    /// Look up the scan a mapping points at.
    pub async fn scan_for_response(&self, response: &ErrataResponse) -> Scan {
        use scanhub_core::persistence::ScanStore;
        let mapping = self
            .store
            .get_mapping(response.id.expect("mapping id"))
            .await
            .unwrap();
        self.store
            .get_scan(mapping.latest_scan.expect("scan recorded"))
            .await
            .unwrap()
    }

    /// Run the worker-side base preparation for a freshly queued target
    /// scan; returns the baseline scan and its sub-job.
    pub async fn prepare_base(&self, scan: &Scan) -> (ScanId, JobId) {
        use scanhub_core::persistence::ScanStore;
        let binding = self.store.get_binding(scan.id).await.unwrap();
        let job = binding.job.expect("target job");
        let spec = self
            .scheduler
            .ensure_base_scanned(scan.id, job)
            .await
            .unwrap()
            .expect("fresh baseline required");
        let base_job = self.broker.create_sub_job(job, spec).await.unwrap();
        self.scheduler
            .create_binding_for_job(base_job)
            .await
            .unwrap();
        let target = self.store.get_scan(scan.id).await.unwrap();
        (target.base.expect("base recorded"), base_job)
    }

    pub fn report(checkers: &[(&str, i64)]) -> ScanReport {
        ScanReport {
            scan: ReportMetadata {
                title: None,
                analyzers: vec![AnalyzerVersionPair {
                    name: "cppcheck".into(),
                    version: "2.9".into(),
                }],
                lines_processed: Some(1000),
                time_elapsed_analysis: Some("00:01:00".into()),
            },
            defects: checkers
                .iter()
                .map(|(checker, line)| ReportDefect {
                    checker: (*checker).into(),
                    annotation: None,
                    cwe: None,
                    defect_identifier: None,
                    function: None,
                    key_event_idx: 0,
                    events: vec![ReportEvent {
                        file_name: "src/main.c".into(),
                        line: *line,
                        column: None,
                        event: "warning".into(),
                        message: format!("{checker} at line {line}"),
                        verbosity_level: None,
                    }],
                })
                .collect(),
        }
    }

    pub fn seed_report(
        &self,
        job: JobId,
        nvr: &str,
        checkers: &[(&str, i64)],
    ) {
        self.artifacts
            .seed(self.artifacts.report_path(job, nvr), Self::report(checkers));
    }

    /// Close the scan's job on the broker and deliver the completion.
    pub async fn finish_job(&self, scan: ScanId) {
        use scanhub_core::persistence::ScanStore;
        let binding = self.store.get_binding(scan).await.unwrap();
        if let Some(job) = binding.job {
            self.broker
                .set_job_state(job, JobState::Closed)
                .await
                .unwrap();
        }
        self.pipeline.on_job_finished(scan).await.unwrap();
    }
}
