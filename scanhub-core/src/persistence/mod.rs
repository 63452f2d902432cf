//! Persistence contracts for the hub's durable state.
//!
//! Domain services depend on these ports only; the PostgreSQL
//! implementations live in [`postgres`], and [`memory`] provides a
//! fully-featured in-memory store used by tests.
//!
//! Invariant-critical compound operations are expressed as single port
//! methods so implementations can make them atomic:
//! [`ScanStore::create_scan_superseding`] (obsolescence check + chain relink
//! + insert under one transaction), [`ResultStore::attach_result`]
//! (insert-if-absent keyed on the binding), and
//! [`VersionStore::replace_snapshot`] (clear + repopulate in one step).

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scanhub_model::{
    AnalyzerVersionPair, AnalyzerVersionSnapshot, ClientAnalyzer, Defect,
    DefectKind, EtMapping, GroupId, JobId, MappingId, MockEnvironment, Nvr,
    Package, PackageId, Profile, Release, ReleaseId, ReleaseMapping,
    ResultGroup, ResultId, Scan, ScanBinding, ScanId, ScanResult, ScanState,
    Tag, Waiver, WaiverId, WaivingLog,
};

use crate::error::Result;

/// Filter shape for scan listings (`get_filtered_scan_list`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanQuery {
    pub id: Option<ScanId>,
    pub target: Option<String>,
    pub base: Option<String>,
    pub state: Option<ScanState>,
    pub owner: Option<String>,
    pub release: Option<String>,
}

/// Outcome of the insert-if-absent result attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    Created(ResultId),
    /// A concurrent or earlier delivery already loaded this binding.
    AlreadyLoaded(ResultId),
}

impl AttachOutcome {
    pub fn result_id(self) -> ResultId {
        match self {
            Self::Created(id) | Self::AlreadyLoaded(id) => id,
        }
    }
}

/// A file upload registered out-of-band, referenced by submissions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
}

/// Scans, bindings, release-tool mappings, and uploads.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn insert_scan(&self, scan: Scan) -> Result<()>;

    async fn get_scan(&self, id: ScanId) -> Result<Scan>;

    async fn update_scan(&self, scan: &Scan) -> Result<()>;

    /// Atomic submission step for target scans, scoped to the new scan's
    /// (package, release): cancel every in-progress target scan in scope
    /// (state + disable only; side effects stay with the caller), re-link
    /// the history chain (previous enabled head becomes the new scan's
    /// `child` and is disabled), and insert the scan plus its binding.
    /// Returns pre-cancellation snapshots of the scans it cancelled.
    ///
    /// Two concurrent submissions for the same scope must serialize here;
    /// both observing "no in-progress scan" would violate the single
    /// in-progress invariant.
    async fn create_scan_superseding(
        &self,
        scan: Scan,
        binding: ScanBinding,
    ) -> Result<Vec<Scan>>;

    async fn insert_binding(&self, binding: ScanBinding) -> Result<()>;

    async fn get_binding(&self, scan: ScanId) -> Result<ScanBinding>;

    async fn binding_for_job(&self, job: JobId) -> Result<Option<ScanBinding>>;

    async fn set_binding_job(&self, scan: ScanId, job: JobId) -> Result<()>;

    /// Newest binding for an NVR, by result submission date, in-progress
    /// last. Failed scans are excluded unless `include_failed`.
    async fn latest_binding_for_nvr(
        &self,
        nvr: &str,
        include_failed: bool,
    ) -> Result<Option<(Scan, ScanBinding)>>;

    /// Latest finished-well, enabled target scan for the scope.
    async fn latest_target_scan(
        &self,
        package: PackageId,
        release: ReleaseId,
    ) -> Result<Option<Scan>>;

    /// The target scan whose `base` points at the given baseline scan.
    async fn scan_with_base(&self, base: ScanId) -> Result<Option<Scan>>;

    async fn find_scans(&self, query: &ScanQuery) -> Result<Vec<Scan>>;

    async fn insert_mapping(&self, mapping: EtMapping) -> Result<()>;

    async fn update_mapping(&self, mapping: &EtMapping) -> Result<()>;

    async fn get_mapping(&self, id: MappingId) -> Result<EtMapping>;

    /// Point mappings at a rescheduled run.
    async fn remap_latest_run(&self, from: ScanId, to: ScanId) -> Result<()>;

    async fn upload_by_id(&self, id: Uuid) -> Result<Option<UploadRecord>>;
}

/// Results, groups, and defects.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert-if-absent keyed on the owning scan binding. Two concurrent
    /// deliveries of the same completion event must not double-create.
    async fn attach_result(
        &self,
        scan: ScanId,
        result: ScanResult,
    ) -> Result<AttachOutcome>;

    async fn get_result(&self, id: ResultId) -> Result<ScanResult>;

    async fn result_for_scan(&self, scan: ScanId)
    -> Result<Option<ScanResult>>;

    async fn insert_group(&self, group: ResultGroup) -> Result<()>;

    async fn update_group(&self, group: &ResultGroup) -> Result<()>;

    async fn get_group(&self, id: GroupId) -> Result<ResultGroup>;

    async fn groups_for_result(
        &self,
        result: ResultId,
    ) -> Result<Vec<ResultGroup>>;

    async fn insert_defects(&self, defects: Vec<Defect>) -> Result<()>;

    async fn defects_for_group(&self, group: GroupId) -> Result<Vec<Defect>>;

    async fn set_defect_states(
        &self,
        group: GroupId,
        state: DefectKind,
    ) -> Result<()>;

    /// Assign 1-based display orders to the group's defects.
    async fn assign_defect_orders(&self, group: GroupId) -> Result<()>;

    /// Groups for the same (checker group, package, release) scope whose
    /// result was submitted after `after`, excluding `exclude`.
    async fn groups_in_scope_since(
        &self,
        checker_group: &str,
        package: PackageId,
        release: ReleaseId,
        after: DateTime<Utc>,
        exclude: GroupId,
    ) -> Result<Vec<ResultGroup>>;

    /// The scan owning a group, via its result's binding.
    async fn scan_for_group(&self, group: GroupId) -> Result<Scan>;
}

/// Waivers and the append-only waiving log.
#[async_trait]
pub trait WaiverStore: Send + Sync {
    async fn insert_waiver(&self, waiver: Waiver) -> Result<()>;

    async fn update_waiver(&self, waiver: &Waiver) -> Result<()>;

    async fn get_waiver(&self, id: WaiverId) -> Result<Waiver>;

    /// Active, non-deleted waivers for a group, newest first.
    async fn live_waivers_for_group(
        &self,
        group: GroupId,
    ) -> Result<Vec<Waiver>>;

    /// Newest live waiver recorded for the (checker group, package,
    /// release) scope, optionally excluding one group.
    async fn last_waiver_in_scope(
        &self,
        checker_group: &str,
        package: PackageId,
        release: ReleaseId,
        exclude_group: Option<GroupId>,
    ) -> Result<Option<Waiver>>;

    async fn append_log(&self, log: WaivingLog) -> Result<()>;

    async fn logs_for_waiver(&self, waiver: WaiverId)
    -> Result<Vec<WaivingLog>>;
}

/// Read-mostly reference data.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn environment_by_name(
        &self,
        name: &str,
    ) -> Result<Option<MockEnvironment>>;

    /// Ordered by mapping priority.
    async fn release_mappings(&self) -> Result<Vec<ReleaseMapping>>;

    async fn tag_by_name(&self, name: &str) -> Result<Option<Tag>>;

    async fn release_by_id(&self, id: ReleaseId) -> Result<Release>;

    async fn release_by_tag(&self, tag: &str) -> Result<Option<Release>>;

    async fn package_by_name(&self, name: &str) -> Result<Option<Package>>;

    async fn get_or_create_package(&self, name: &str) -> Result<Package>;

    /// Release-scoped block override; `None` when no attribute exists.
    async fn package_blocked_override(
        &self,
        package: PackageId,
        release: ReleaseId,
    ) -> Result<Option<bool>>;

    async fn analyzers(&self) -> Result<Vec<ClientAnalyzer>>;

    async fn analyzer_by_cli_name(
        &self,
        name: &str,
    ) -> Result<Option<ClientAnalyzer>>;

    async fn profile_by_name(&self, name: &str) -> Result<Option<Profile>>;

    async fn profiles(&self) -> Result<Vec<Profile>>;

    async fn checker_group_for(&self, checker: &str)
    -> Result<Option<String>>;

    /// Register a checker under a group the first time it is seen.
    async fn ensure_checker(&self, checker: &str, group: &str) -> Result<()>;
}

/// Per-environment analyzer version snapshots.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn snapshot(
        &self,
        environment: &str,
    ) -> Result<Vec<AnalyzerVersionSnapshot>>;

    /// Replace the environment's entire snapshot set and stamp the refresh
    /// time, atomically; a torn (partially cleared) set must never be
    /// observable.
    async fn replace_snapshot(
        &self,
        environment: &str,
        versions: &[AnalyzerVersionPair],
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn last_refreshed(
        &self,
        environment: &str,
    ) -> Result<Option<DateTime<Utc>>>;
}

/// Convenience: derive the scan-history package name candidates used by
/// priority resolution, in lookup order.
pub fn package_name_candidates(
    supposed_nvr: Option<&str>,
    artifact_name: Option<&str>,
    is_tarball: bool,
) -> Vec<String> {
    let mut candidates = Vec::new();

    let mut stripped = artifact_name.map(str::to_string);
    if let Some(name) = stripped.as_mut() {
        if let Some(prefix) = name.strip_suffix(".src.rpm") {
            *name = prefix.to_string();
        }
        if is_tarball {
            if let Some(idx) = name.find(".tar") {
                name.truncate(idx);
            }
        }
    }

    if let Some(parsed) = supposed_nvr
        .or(stripped.as_deref())
        .and_then(|raw| Nvr::parse(raw).ok())
    {
        candidates.push(parsed.name);
    }

    if let Some(name) = stripped {
        // also try name-minus-trailing-release and the whole filename
        if let Some((head, _)) = name.rsplit_once('-') {
            candidates.push(head.to_string());
        }
        candidates.push(name);
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_prefer_parsed_nvr_name() {
        let candidates = package_name_candidates(
            Some("expat-2.5.0-1.el9"),
            Some("expat-2.5.0-1.el9.src.rpm"),
            false,
        );
        assert_eq!(candidates[0], "expat");
    }

    #[test]
    fn tarball_suffixes_are_stripped() {
        let candidates =
            package_name_candidates(None, Some("zlib-1.3.tar.gz"), true);
        assert!(candidates.contains(&"zlib".to_string()));
        assert!(candidates.contains(&"zlib-1.3".to_string()));
    }
}
