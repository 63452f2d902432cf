//! Scan scheduling: validation, priority, admission, and job description.
//!
//! One submission path per request variant, all sharing the same explicit
//! pipeline: validate → compute priority → persist (with the atomic
//! obsolescence check) → describe the job for the broker. Baseline
//! preparation and the version-cache probe are spawned as sub-jobs through
//! the worker callback surface.

pub mod priority;
pub mod request;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use scanhub_config::ScanningConfig;
use scanhub_model::{
    EtMapping, JobId, MappingId, Nvr, RequestState, Scan, ScanBinding, ScanId,
    ScanState, ScanType,
};

use crate::baseline::{BaseScanResolver, BaselineDecision};
use crate::catalog::{Catalog, merge_selection};
use crate::error::{HubError, Result};
use crate::external::{BuildSystem, JobSpec, TaskBroker};
use crate::persistence::ScanStore;
use crate::scheduler::priority::determine_priority;
use crate::scheduler::request::{
    BaseSpec, ErrataResponse, ErrataScanState, ErrataSubmission, Principal,
    SubmissionSource, UserDiffSubmission, UserScanSubmission,
};
use crate::versions::AnalyzerVersionCache;
use crate::waiving::WaiverStateMachine;

/// Worker method names.
pub const METHOD_ERRATA_DIFF_BUILD: &str = "ErrataDiffBuild";
pub const METHOD_MOCK_BUILD: &str = "MockBuild";
pub const METHOD_DIFF_BUILD: &str = "DiffBuild";
pub const METHOD_VERSION_DIFF_BUILD: &str = "VersionDiffBuild";

/// The scan admission and job-description engine.
#[derive(Clone)]
pub struct ScanScheduler {
    scans: Arc<dyn ScanStore>,
    catalog: Arc<Catalog>,
    versions: AnalyzerVersionCache,
    resolver: BaseScanResolver,
    broker: Arc<dyn TaskBroker>,
    build_system: Arc<dyn BuildSystem>,
    state: WaiverStateMachine,
    config: ScanningConfig,
}

impl std::fmt::Debug for ScanScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanScheduler").finish_non_exhaustive()
    }
}

struct ValidatedSource {
    /// NVR string when the source is a build or parses as one.
    nvr: Option<String>,
    /// Uploaded file name, when any.
    artifact: Option<String>,
    is_tarball: bool,
    /// Stem the worker names result artifacts after.
    result_filename: String,
    /// Job label: the NVR or the uploaded file name.
    label: String,
}

impl ScanScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scans: Arc<dyn ScanStore>,
        catalog: Arc<Catalog>,
        versions: AnalyzerVersionCache,
        resolver: BaseScanResolver,
        broker: Arc<dyn TaskBroker>,
        build_system: Arc<dyn BuildSystem>,
        state: WaiverStateMachine,
        config: ScanningConfig,
    ) -> Self {
        Self {
            scans,
            catalog,
            versions,
            resolver,
            broker,
            build_system,
            state,
            config,
        }
    }

    // ------------------------------------------------------------------
    // user submissions

    /// Ad-hoc user scan of a single artifact.
    pub async fn submit_user_scan(
        &self,
        submission: UserScanSubmission,
        principal: &Principal,
    ) -> Result<ScanBinding> {
        let method = if submission.diff_patches {
            METHOD_DIFF_BUILD
        } else {
            METHOD_MOCK_BUILD
        };
        let (scan_id, spec) = self
            .prepare_user_scan(&submission, principal, method)
            .await?;
        self.dispatch(scan_id, spec).await
    }

    /// Differential user scan; the baseline is exactly the client-supplied
    /// one, embedded as a sub-job description.
    pub async fn submit_user_diff(
        &self,
        submission: UserDiffSubmission,
        principal: &Principal,
    ) -> Result<ScanBinding> {
        let base_source = self
            .validate_source(&submission.base_source, principal)
            .await?;
        let base_environment = match &submission.base_environment {
            Some(name) => {
                self.catalog.verify_environment(name).await?;
                name.clone()
            }
            None => {
                self.resolve_environment(
                    &submission.target.environment,
                    &submission.target.source,
                )
                .await?
            }
        };

        let (scan_id, mut spec) = self
            .prepare_user_scan(
                &submission.target,
                principal,
                METHOD_VERSION_DIFF_BUILD,
            )
            .await?;

        // base task args go last so the worker spawns the base job first
        let mut base_args = json!({
            "mock_config": base_environment,
            "profile": spec.args["profile"],
            "analyzers": spec.args["analyzers"],
            "scanner_args": spec.args["scanner_args"],
            "result_filename": base_source.result_filename,
        });
        match &submission.base_source {
            SubmissionSource::Build { nvr } => {
                base_args["build"] = json!(nvr);
            }
            SubmissionSource::Upload {
                upload_id,
                filename,
            }
            | SubmissionSource::Tarball {
                upload_id,
                filename,
                ..
            } => {
                base_args["srpm_name"] = json!(filename);
                base_args["upload_id"] = json!(upload_id);
            }
        }
        spec.set_arg(
            "base_task_args",
            json!({
                "method": METHOD_VERSION_DIFF_BUILD,
                "args": base_args,
                "label": base_source.label,
            }),
        );
        self.dispatch(scan_id, spec).await
    }

    async fn prepare_user_scan(
        &self,
        submission: &UserScanSubmission,
        principal: &Principal,
        method: &str,
    ) -> Result<(ScanId, JobSpec)> {
        let source =
            self.validate_source(&submission.source, principal).await?;

        let explicit =
            self.catalog.verify_analyzers(&submission.analyzers).await?;
        let profile_name = submission
            .profile
            .clone()
            .unwrap_or_else(|| self.config.default_profile.clone());
        let profile = self.catalog.profile(&profile_name).await?;
        let selection = merge_selection(&profile, &explicit);

        let environment = self
            .resolve_environment(&submission.environment, &submission.source)
            .await?;

        let priority = determine_priority(
            &self.catalog,
            &self.config,
            principal,
            submission.priority,
            source.nvr.as_deref(),
            source.artifact.as_deref(),
            source.is_tarball,
        )
        .await?;

        let package_name = source
            .nvr
            .as_deref()
            .and_then(|raw| Nvr::parse(raw).ok())
            .map(|nvr| nvr.name)
            .unwrap_or_else(|| source.result_filename.clone());
        let package =
            self.catalog.get_or_create_package(&package_name).await?;

        let now = Utc::now();
        let scan = Scan {
            id: ScanId::new(),
            nvr: source.nvr.clone().unwrap_or_else(|| source.label.clone()),
            scan_type: ScanType::User,
            state: ScanState::Init,
            base: None,
            parent: None,
            child: None,
            package: package.id,
            release: None,
            environment: environment.clone(),
            owner: principal.username.clone(),
            enabled: true,
            submitted_at: now,
            last_access: now,
        };
        let scan_id = scan.id;
        self.scans.insert_scan(scan).await?;
        self.scans
            .insert_binding(ScanBinding::new(scan_id))
            .await?;

        let mut spec = JobSpec::new(method, &source.label, &principal.username)
            .with_priority(priority)
            .with_comment(&submission.comment);
        match &submission.source {
            SubmissionSource::Build { nvr } => {
                spec.set_arg("build", json!(nvr));
            }
            SubmissionSource::Upload {
                upload_id,
                filename,
            } => {
                spec.set_arg("srpm_name", json!(filename));
                spec.set_arg("upload_id", json!(upload_id));
            }
            SubmissionSource::Tarball {
                upload_id,
                filename,
                build_script,
            } => {
                spec.set_arg("srpm_name", json!(filename));
                spec.set_arg("upload_id", json!(upload_id));
                spec.set_arg("source", json!({ "type": "tar" }));
                spec.set_arg("build_script", json!(build_script));
            }
        }
        spec.set_arg("result_filename", json!(source.result_filename));
        spec.set_arg("mock_config", json!(environment));
        spec.set_arg("profile", json!(profile.name));
        spec.set_arg("analyzers", json!(selection.chain()));
        spec.set_arg(
            "scanner_args",
            json!(self.scanner_args(submission, &selection)),
        );
        if let Some(email) = &submission.email_to {
            spec.set_arg("email_to", json!(email));
        }
        Ok((scan_id, spec))
    }

    /// Assemble the scanner argument string with documented precedence:
    /// profile args < analyzer args < client options < client override.
    fn scanner_args(
        &self,
        submission: &UserScanSubmission,
        selection: &crate::catalog::AnalyzerSelection,
    ) -> String {
        let mut args = selection.args.clone();
        if submission.diff_patches {
            args.push("--diff-patches".to_string());
        }
        if let Some(level) = &submission.warning_level {
            args.push(format!("-w{level}"));
        }
        if let Some(packages) = &submission.install_to_chroot {
            args.push(format!("--install='{packages}'"));
        }
        if let Some(client_args) = submission
            .scanner_args
            .as_ref()
            .filter(|args| !args.is_empty())
        {
            args.push(client_args.clone());
        }
        let opts = args.join(" ");
        info!("task opts are '{opts}'");
        opts
    }

    // ------------------------------------------------------------------
    // release-tool submissions

    /// The always-structured entry point for the release tool. Never
    /// propagates an error: every outcome lands in the response and on the
    /// persisted mapping.
    pub async fn handle_errata_request(
        &self,
        submission: ErrataSubmission,
        principal: &Principal,
    ) -> ErrataResponse {
        let mut mapping = EtMapping::new(
            submission.advisory_id.clone(),
            submission.external_scan_id.clone(),
        );
        let mapping_id = mapping.id;
        if let Err(err) = self.scans.insert_mapping(mapping.clone()).await {
            warn!("failed to persist release-tool mapping: {err}");
            return ErrataResponse {
                status: RequestState::Error,
                message: Some(err.to_string()),
                id: None,
            };
        }

        let (status, message) =
            match self.submit_errata(&submission, principal).await {
                Ok(binding) => {
                    mapping.latest_scan = Some(binding.scan);
                    (RequestState::Ok, None)
                }
                Err(HubError::Ineligible(msg)) => {
                    (RequestState::Ineligible, Some(msg))
                }
                Err(err) => (
                    RequestState::Error,
                    Some(format!(
                        "Unable to submit the scan, error: {err}"
                    )),
                ),
            };

        mapping.state = status;
        if let Some(msg) = &message {
            mapping.comment = msg.clone();
        }
        if let Err(err) = self.scans.update_mapping(&mapping).await {
            warn!("failed to update release-tool mapping: {err}");
        }

        ErrataResponse {
            status,
            message,
            id: Some(mapping_id),
        }
    }

    /// Poll the state of a release-tool submission.
    pub async fn errata_scan_state(
        &self,
        mapping_id: MappingId,
    ) -> Result<ErrataScanState> {
        let mapping = self.scans.get_mapping(mapping_id).await?;
        let state = match mapping.latest_scan {
            Some(scan_id) => Some(self.scans.get_scan(scan_id).await?.state),
            None => None,
        };
        Ok(ErrataScanState {
            status: mapping.state,
            message: (!mapping.comment.is_empty())
                .then(|| mapping.comment.clone()),
            state,
        })
    }

    /// Validate and persist one CI/release-tool scan; the scan type falls
    /// out of the base spec (new-package marker or version comparison).
    pub async fn submit_errata(
        &self,
        submission: &ErrataSubmission,
        principal: &Principal,
    ) -> Result<ScanBinding> {
        let target = Nvr::parse(&submission.target)?;
        if self
            .build_system
            .lookup_build(&submission.target)
            .await?
            .is_none()
        {
            return Err(HubError::NotFound(format!(
                "build {} does not exist",
                submission.target
            )));
        }

        let base = BaseSpec::parse(&submission.base);
        let scan_type = match &base {
            BaseSpec::NewPackage => ScanType::NewPackage,
            BaseSpec::Build(base_nvr) => {
                let base = Nvr::parse(base_nvr)?;
                if target.is_rebase_of(&base) {
                    ScanType::Rebase
                } else {
                    ScanType::Regular
                }
            }
        };

        let tag = self.catalog.tag_for_release(&submission.release).await?;
        self.catalog.verify_environment(&tag.environment).await?;
        let package =
            self.catalog.get_or_create_package(&target.name).await?;

        let mut priority =
            self.config.default_priority + i32::from(package.priority_offset);
        if tag.environment == self.config.container_environment {
            priority = self.config.container_priority;
        } else {
            self.check_structural_eligibility(&package.name)?;
        }
        self.catalog.blocked_check(&package, tag.release).await?;

        let now = Utc::now();
        let scan = Scan {
            id: ScanId::new(),
            nvr: submission.target.clone(),
            scan_type,
            state: ScanState::Init,
            base: None,
            parent: None,
            child: None,
            package: package.id,
            release: Some(tag.release),
            environment: tag.environment.clone(),
            owner: submission.package_owner.clone(),
            enabled: true,
            submitted_at: now,
            last_access: now,
        };
        let scan_id = scan.id;

        // atomic with the insert: at most one in-progress scan per
        // (package, release) may exist at any instant
        let obsoleted = self
            .scans
            .create_scan_superseding(scan, ScanBinding::new(scan_id))
            .await?;
        for before in obsoleted {
            info!(superseded = %before.id, by = %scan_id, "scan obsoleted");
            self.state.finalize_obsolete(before).await?;
        }

        let mut spec = JobSpec::new(
            METHOD_ERRATA_DIFF_BUILD,
            &submission.target,
            &principal.username,
        )
        .with_priority(priority.max(0))
        .with_comment(&format!("errata scan of {}", submission.target));
        spec.set_arg("build", json!(submission.target));
        spec.set_arg("mock_config", json!(tag.environment));
        if let BaseSpec::Build(base_nvr) = &base {
            spec.set_arg("base_nvr", json!(base_nvr));
        }
        self.dispatch(scan_id, spec).await
    }

    fn check_structural_eligibility(&self, package_name: &str) -> Result<()> {
        for prefix in &self.config.ineligible_name_prefixes {
            if package_name.starts_with(prefix.as_str()) {
                return Err(HubError::Ineligible(format!(
                    "{prefix} is not eligible for scanning."
                )));
            }
        }
        for suffix in &self.config.ineligible_name_suffixes {
            if package_name.ends_with(suffix.as_str()) {
                return Err(HubError::Ineligible(format!(
                    "Container {package_name} is not eligible for scanning."
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // resubmission

    /// Reschedule a failed scan. Only the latest run of the NVR may be
    /// rescanned, and only when it actually failed.
    pub async fn rescan(
        &self,
        scan_id: ScanId,
        principal: &Principal,
    ) -> Result<ScanBinding> {
        let scan = self.scans.get_scan(scan_id).await?;
        let (latest_scan, latest_binding) = self
            .scans
            .latest_binding_for_nvr(&scan.nvr, true)
            .await?
            .ok_or_else(|| {
                HubError::NotFound(format!(
                    "no binding recorded for {}",
                    scan.nvr
                ))
            })?;

        if latest_scan.state != ScanState::Failed {
            return Err(HubError::Conflict(format!(
                "Latest scan {} of {} has not failed. This is not supported.",
                latest_scan.id, scan.nvr
            )));
        }

        let old_job = latest_binding.job.ok_or_else(|| {
            HubError::Broker(format!("scan {} has no job", latest_scan.id))
        })?;
        let old_info =
            self.broker.job_info(old_job).await?.ok_or_else(|| {
                HubError::Broker(format!("job {old_job} is unknown"))
            })?;

        if latest_scan.is_baseline() {
            let new_scan = self
                .clone_scan(&latest_scan, None, false)
                .await?;
            let mut spec = JobSpec::new(
                &old_info.method,
                &old_info.label,
                &principal.username,
            )
            .with_priority(old_info.priority)
            .with_comment(&format!("Rescan of base {}", latest_scan.nvr));
            spec.args = old_info.args.clone();
            return self.dispatch(new_scan, spec).await;
        }

        if old_info.parent.is_some() {
            return Err(HubError::Conflict(
                "rescan of a scan with a parent job is unsupported".into(),
            ));
        }

        let base_id = latest_scan.base.ok_or_else(|| {
            HubError::Conflict(format!(
                "scan {} has no base recorded",
                latest_scan.id
            ))
        })?;
        let base_nvr = self.scans.get_scan(base_id).await?.nvr;
        let base_binding = self
            .scans
            .latest_binding_for_nvr(&base_nvr, false)
            .await?
            .ok_or_else(|| {
                HubError::Conflict(format!(
                    "no base scan of {base_nvr} finished successfully; \
                     reschedule the base first"
                ))
            })?;

        let new_scan = self
            .clone_scan(&latest_scan, Some(base_binding.0.id), true)
            .await?;
        self.scans.remap_latest_run(latest_scan.id, new_scan).await?;

        let mut spec = JobSpec::new(
            &old_info.method,
            &old_info.label,
            &principal.username,
        )
        .with_priority(old_info.priority)
        .with_comment(&format!("Rescan of {}", latest_scan.nvr));
        spec.args = old_info.args.clone();
        self.dispatch(new_scan, spec).await
    }

    async fn clone_scan(
        &self,
        original: &Scan,
        base: Option<ScanId>,
        enabled: bool,
    ) -> Result<ScanId> {
        let now = Utc::now();
        let mut clone = original.clone();
        clone.id = ScanId::new();
        clone.state = ScanState::Init;
        clone.base = base;
        clone.parent = None;
        clone.child = Some(original.id);
        clone.enabled = enabled;
        clone.submitted_at = now;
        clone.last_access = now;
        let clone_id = clone.id;
        self.scans.insert_scan(clone).await?;
        self.scans
            .insert_binding(ScanBinding::new(clone_id))
            .await?;

        let mut old = original.clone();
        old.parent = Some(clone_id);
        self.scans.update_scan(&old).await?;
        Ok(clone_id)
    }

    // ------------------------------------------------------------------
    // worker-driven preparation

    /// Make sure the target's baseline is scanned with up-to-date
    /// analyzers; when it is not, describe the baseline sub-job the worker
    /// must spawn before the target job runs.
    pub async fn ensure_base_scanned(
        &self,
        scan_id: ScanId,
        job_id: JobId,
    ) -> Result<Option<JobSpec>> {
        let scan = self.scans.get_scan(scan_id).await?;
        if !scan.scan_type.can_have_base() {
            debug!(scan = %scan.id, "scan does not need a base");
            return Ok(None);
        }

        let info = self.broker.job_info(job_id).await?.ok_or_else(|| {
            HubError::Broker(format!("job {job_id} is unknown"))
        })?;
        let base_nvr = info
            .args
            .get("base_nvr")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                HubError::Broker(format!("job {job_id} carries no base_nvr"))
            })?
            .to_string();
        let auto_environment =
            info.args.get("mock_config").and_then(|v| v.as_str())
                == Some("auto");

        if !auto_environment {
            match self.resolver.resolve(&base_nvr, &scan.environment).await? {
                BaselineDecision::Reuse(base)
                | BaselineDecision::WaitFor(base) => {
                    info!(base = %base.id, "using cached base scan");
                    let mut updated = scan.clone();
                    updated.base = Some(base.id);
                    self.scans.update_scan(&updated).await?;
                    return Ok(None);
                }
                BaselineDecision::NeedsFreshScan => {}
            }
        }

        info!(%base_nvr, "preparing fresh base scan");
        let environment = if auto_environment {
            "auto".to_string()
        } else {
            scan.environment.clone()
        };
        let now = Utc::now();
        let base_scan = Scan {
            id: ScanId::new(),
            nvr: base_nvr.clone(),
            scan_type: ScanType::Baseline,
            state: ScanState::Init,
            base: None,
            parent: None,
            child: None,
            package: scan.package,
            release: scan.release,
            environment: environment.clone(),
            owner: scan.owner.clone(),
            // base scans never show up in end-user history
            enabled: false,
            submitted_at: now,
            last_access: now,
        };
        let base_id = base_scan.id;
        self.scans.insert_scan(base_scan).await?;

        let mut updated = scan.clone();
        updated.base = Some(base_id);
        self.scans.update_scan(&updated).await?;

        let mut spec =
            JobSpec::new(&info.method, &base_nvr, &info.owner)
                .with_priority(info.priority);
        spec.set_arg("build", json!(base_nvr));
        spec.set_arg("mock_config", json!(environment));
        spec.set_arg("scan_id", json!(base_id));
        Ok(Some(spec))
    }

    /// Spawn a version-cache probe when the environment's snapshot is
    /// stale.
    pub async fn ensure_cache(
        &self,
        environment: &str,
        profile_name: &str,
    ) -> Result<Option<JobSpec>> {
        if !self.versions.is_stale(environment).await? {
            return Ok(None);
        }
        let profile = self.catalog.profile(profile_name).await?;
        Ok(Some(self.versions.refresh_job(environment, &profile)))
    }

    /// Bind a worker-spawned sub-job to the scan named in its args
    /// (`worker.create_sb`).
    pub async fn create_binding_for_job(&self, job_id: JobId) -> Result<()> {
        let info = self.broker.job_info(job_id).await?.ok_or_else(|| {
            HubError::Broker(format!("job {job_id} is unknown"))
        })?;
        let scan_id = info
            .args
            .get("scan_id")
            .and_then(|v| v.as_str())
            .and_then(|raw| raw.parse::<uuid::Uuid>().ok())
            .ok_or_else(|| {
                HubError::Broker(format!("job {job_id} names no scan"))
            })?;
        self.scans
            .insert_binding(ScanBinding::with_job(ScanId(scan_id), job_id))
            .await
    }

    // ------------------------------------------------------------------
    // shared tail of every submission path

    /// Create the broker job, attach it to the binding, and queue the scan.
    async fn dispatch(
        &self,
        scan_id: ScanId,
        mut spec: JobSpec,
    ) -> Result<ScanBinding> {
        let scan = self.scans.get_scan(scan_id).await?;
        if scan.state != ScanState::Init {
            // superseded by a concurrent submission before dispatch
            info!(scan = %scan_id, state = %scan.state, "not enqueueing");
            return self.scans.get_binding(scan_id).await;
        }
        spec.set_arg("scan_id", json!(scan_id));
        let job = self.broker.create_job(spec).await?;
        self.scans.set_binding_job(scan_id, job).await?;
        self.state.mark_queued(scan_id).await?;
        self.scans.get_binding(scan_id).await
    }

    /// Resolve the submission source: builds must exist in the build
    /// system, uploads must belong to the submitting principal.
    async fn validate_source(
        &self,
        source: &SubmissionSource,
        principal: &Principal,
    ) -> Result<ValidatedSource> {
        match source {
            SubmissionSource::Build { nvr } => {
                Nvr::parse(nvr)?;
                if self.build_system.lookup_build(nvr).await?.is_none() {
                    return Err(HubError::NotFound(format!(
                        "build {nvr} does not exist"
                    )));
                }
                Ok(ValidatedSource {
                    nvr: Some(nvr.clone()),
                    artifact: None,
                    is_tarball: false,
                    result_filename: nvr.clone(),
                    label: nvr.clone(),
                })
            }
            SubmissionSource::Upload {
                upload_id,
                filename,
            } => {
                self.check_upload(*upload_id, principal).await?;
                let stem = filename
                    .strip_suffix(".src.rpm")
                    .unwrap_or(filename)
                    .to_string();
                Ok(ValidatedSource {
                    nvr: Nvr::parse(&stem).ok().map(|n| n.to_string()),
                    artifact: Some(filename.clone()),
                    is_tarball: false,
                    result_filename: stem,
                    label: filename.clone(),
                })
            }
            SubmissionSource::Tarball {
                upload_id,
                filename,
                ..
            } => {
                self.check_upload(*upload_id, principal).await?;
                let stem = match filename.find(".tar") {
                    Some(idx) => filename[..idx].to_string(),
                    None => filename
                        .rsplit_once('.')
                        .map(|(head, _)| head.to_string())
                        .unwrap_or_else(|| filename.clone()),
                };
                Ok(ValidatedSource {
                    nvr: None,
                    artifact: Some(filename.clone()),
                    is_tarball: true,
                    result_filename: stem,
                    label: filename.clone(),
                })
            }
        }
    }

    async fn check_upload(
        &self,
        upload_id: uuid::Uuid,
        principal: &Principal,
    ) -> Result<()> {
        let upload = self
            .scans
            .upload_by_id(upload_id)
            .await?
            .ok_or_else(|| {
                HubError::NotFound(format!(
                    "can't find uploaded file with id {upload_id}"
                ))
            })?;
        if upload.owner != principal.username {
            return Err(HubError::Validation(
                "can't process a file uploaded by a different user".into(),
            ));
        }
        Ok(())
    }

    /// Turn the `auto` environment marker into a concrete environment from
    /// the build's origin metadata; container images go to the
    /// high-throughput environment.
    async fn resolve_environment(
        &self,
        requested: &str,
        source: &SubmissionSource,
    ) -> Result<String> {
        if requested != "auto" {
            self.catalog.verify_environment(requested).await?;
            return Ok(requested.to_string());
        }
        let SubmissionSource::Build { nvr } = source else {
            return Err(HubError::Validation(
                "automatic environment selection needs a build reference"
                    .into(),
            ));
        };
        let info = self
            .build_system
            .lookup_build(nvr)
            .await?
            .ok_or_else(|| {
                HubError::NotFound(format!("build {nvr} does not exist"))
            })?;
        if info.is_container {
            return Ok(self.config.container_environment.clone());
        }
        let origin = info.origin_tag.ok_or_else(|| {
            HubError::Validation(format!(
                "build {nvr} carries no origin tag to select an environment"
            ))
        })?;
        let tag = self.catalog.tag_for_release(&origin).await?;
        self.catalog.verify_environment(&tag.environment).await?;
        Ok(tag.environment)
    }
}
