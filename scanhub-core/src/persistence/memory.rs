//! In-memory implementations of the persistence ports and the task broker.
//!
//! Backs the unit and integration tests, and doubles as the reference
//! semantics for the compound atomic operations: everything here runs under
//! one mutex, so the invariants hold trivially and tests exercise the real
//! service logic.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use scanhub_model::{
    AnalyzerVersionPair, AnalyzerVersionSnapshot, ClientAnalyzer, Defect,
    DefectKind, EtMapping, GroupId, JobId, MappingId, MockEnvironment,
    Package, PackageId, PackageReleaseAttribute, Profile, Release, ReleaseId,
    ReleaseMapping, ResultGroup, ResultId, Scan, ScanBinding, ScanId,
    ScanResult, Tag, Waiver, WaiverId, WaivingLog,
};

use crate::error::{HubError, Result};
use crate::external::{JobInfo, JobQuery, JobSpec, JobState, TaskBroker};
use crate::persistence::{
    AttachOutcome, CatalogStore, ResultStore, ScanQuery, ScanStore,
    UploadRecord, VersionStore, WaiverStore,
};

#[derive(Default)]
struct Inner {
    scans: HashMap<ScanId, Scan>,
    bindings: HashMap<ScanId, ScanBinding>,
    mappings: HashMap<MappingId, EtMapping>,
    uploads: HashMap<Uuid, UploadRecord>,
    results: HashMap<ResultId, ScanResult>,
    groups: HashMap<GroupId, ResultGroup>,
    defects: Vec<Defect>,
    waivers: HashMap<WaiverId, Waiver>,
    logs: Vec<WaivingLog>,
    environments: HashMap<String, MockEnvironment>,
    tags: HashMap<String, Tag>,
    releases: HashMap<ReleaseId, Release>,
    release_mappings: Vec<ReleaseMapping>,
    packages: HashMap<PackageId, Package>,
    package_attrs: Vec<PackageReleaseAttribute>,
    analyzers: Vec<ClientAnalyzer>,
    profiles: HashMap<String, Profile>,
    checkers: HashMap<String, String>,
    snapshots: HashMap<String, Vec<AnalyzerVersionSnapshot>>,
    refreshed: HashMap<String, DateTime<Utc>>,
}

/// One store implementing every persistence port behind a single lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // fixture seeding

    pub fn put_package(&self, package: Package) {
        let mut inner = self.inner.lock().unwrap();
        inner.packages.insert(package.id, package);
    }

    pub fn put_environment(&self, environment: MockEnvironment) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .environments
            .insert(environment.name.clone(), environment);
    }

    pub fn put_tag(&self, tag: Tag) {
        let mut inner = self.inner.lock().unwrap();
        inner.tags.insert(tag.name.clone(), tag);
    }

    pub fn put_release(&self, release: Release) {
        let mut inner = self.inner.lock().unwrap();
        inner.releases.insert(release.id, release);
    }

    pub fn put_release_mapping(&self, mapping: ReleaseMapping) {
        let mut inner = self.inner.lock().unwrap();
        inner.release_mappings.push(mapping);
        inner.release_mappings.sort_by_key(|m| m.priority);
    }

    pub fn put_analyzer(&self, analyzer: ClientAnalyzer) {
        let mut inner = self.inner.lock().unwrap();
        inner.analyzers.push(analyzer);
    }

    pub fn put_profile(&self, profile: Profile) {
        let mut inner = self.inner.lock().unwrap();
        inner.profiles.insert(profile.name.clone(), profile);
    }

    pub fn put_upload(&self, upload: UploadRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.uploads.insert(upload.id, upload);
    }

    pub fn put_package_attribute(&self, attr: PackageReleaseAttribute) {
        let mut inner = self.inner.lock().unwrap();
        inner.package_attrs.push(attr);
    }
}

fn scope_matches(scan: &Scan, package: PackageId, release: ReleaseId) -> bool {
    scan.package == package && scan.release == Some(release)
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn insert_scan(&self, scan: Scan) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.scans.insert(scan.id, scan);
        Ok(())
    }

    async fn get_scan(&self, id: ScanId) -> Result<Scan> {
        let inner = self.inner.lock().unwrap();
        inner
            .scans
            .get(&id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("scan {id}")))
    }

    async fn update_scan(&self, scan: &Scan) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.scans.contains_key(&scan.id) {
            return Err(HubError::NotFound(format!("scan {}", scan.id)));
        }
        inner.scans.insert(scan.id, scan.clone());
        Ok(())
    }

    async fn create_scan_superseding(
        &self,
        mut scan: Scan,
        binding: ScanBinding,
    ) -> Result<Vec<Scan>> {
        let mut inner = self.inner.lock().unwrap();
        let mut canceled = Vec::new();

        if scan.scan_type.is_target() {
            if let Some(release) = scan.release {
                let in_progress: Vec<ScanId> = inner
                    .scans
                    .values()
                    .filter(|s| {
                        scope_matches(s, scan.package, release)
                            && s.scan_type.is_target()
                            && s.state.is_in_progress()
                    })
                    .map(|s| s.id)
                    .collect();
                for id in in_progress {
                    let entry = inner.scans.get_mut(&id).expect("present");
                    canceled.push(entry.clone());
                    entry.state = scanhub_model::ScanState::Canceled;
                    entry.enabled = false;
                }

                // the canceled head's most recent successful ancestor takes
                // its place before the chain is re-linked below
                for before in &canceled {
                    let mut cursor = before.child;
                    while let Some(id) = cursor {
                        let ancestor =
                            inner.scans.get_mut(&id).expect("present");
                        if ancestor.state.finished_well() {
                            ancestor.enabled = true;
                            break;
                        }
                        cursor = ancestor.child;
                    }
                }

                let head = inner
                    .scans
                    .values()
                    .filter(|s| {
                        scope_matches(s, scan.package, release)
                            && s.scan_type.is_target()
                            && s.state.finished_well()
                    })
                    .max_by_key(|s| s.submitted_at)
                    .map(|s| s.id);
                if let Some(head_id) = head {
                    let head_scan =
                        inner.scans.get_mut(&head_id).expect("present");
                    head_scan.parent = Some(scan.id);
                    head_scan.enabled = false;
                    scan.child = Some(head_id);
                }
            }
        }

        inner.scans.insert(scan.id, scan);
        inner.bindings.insert(binding.scan, binding);
        Ok(canceled)
    }

    async fn insert_binding(&self, binding: ScanBinding) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.bindings.insert(binding.scan, binding);
        Ok(())
    }

    async fn get_binding(&self, scan: ScanId) -> Result<ScanBinding> {
        let inner = self.inner.lock().unwrap();
        inner
            .bindings
            .get(&scan)
            .copied()
            .ok_or_else(|| HubError::NotFound(format!("binding for {scan}")))
    }

    async fn binding_for_job(
        &self,
        job: JobId,
    ) -> Result<Option<ScanBinding>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .bindings
            .values()
            .find(|b| b.job == Some(job))
            .copied())
    }

    async fn set_binding_job(&self, scan: ScanId, job: JobId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let binding = inner
            .bindings
            .get_mut(&scan)
            .ok_or_else(|| HubError::NotFound(format!("binding for {scan}")))?;
        binding.job = Some(job);
        Ok(())
    }

    async fn latest_binding_for_nvr(
        &self,
        nvr: &str,
        include_failed: bool,
    ) -> Result<Option<(Scan, ScanBinding)>> {
        let inner = self.inner.lock().unwrap();
        let latest = inner
            .scans
            .values()
            .filter(|s| s.nvr == nvr)
            .filter(|s| include_failed || !s.is_failed())
            .max_by_key(|s| s.submitted_at)
            .cloned();
        Ok(latest.map(|scan| {
            let binding = inner
                .bindings
                .get(&scan.id)
                .copied()
                .unwrap_or_else(|| ScanBinding::new(scan.id));
            (scan, binding)
        }))
    }

    async fn latest_target_scan(
        &self,
        package: PackageId,
        release: ReleaseId,
    ) -> Result<Option<Scan>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .scans
            .values()
            .filter(|s| {
                scope_matches(s, package, release)
                    && s.scan_type.is_target()
                    && s.state.finished_well()
            })
            .max_by_key(|s| s.submitted_at)
            .cloned())
    }

    async fn scan_with_base(&self, base: ScanId) -> Result<Option<Scan>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .scans
            .values()
            .find(|s| s.base == Some(base))
            .cloned())
    }

    async fn find_scans(&self, query: &ScanQuery) -> Result<Vec<Scan>> {
        let inner = self.inner.lock().unwrap();
        let mut matches: Vec<Scan> = inner
            .scans
            .values()
            .filter(|s| query.id.is_none_or(|id| s.id == id))
            .filter(|s| {
                query
                    .target
                    .as_deref()
                    .is_none_or(|target| s.nvr == target)
            })
            .filter(|s| {
                query.base.as_deref().is_none_or(|base_nvr| {
                    s.base.is_some_and(|base_id| {
                        inner
                            .scans
                            .get(&base_id)
                            .is_some_and(|base| base.nvr == base_nvr)
                    })
                })
            })
            .filter(|s| query.state.is_none_or(|state| s.state == state))
            .filter(|s| {
                query.owner.as_deref().is_none_or(|owner| s.owner == owner)
            })
            .filter(|s| {
                query.release.as_deref().is_none_or(|tag| {
                    s.release.is_some_and(|id| {
                        inner
                            .releases
                            .get(&id)
                            .is_some_and(|release| release.tag == tag)
                    })
                })
            })
            .cloned()
            .collect();
        matches.sort_by_key(|s| std::cmp::Reverse(s.submitted_at));
        Ok(matches)
    }

    async fn insert_mapping(&self, mapping: EtMapping) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.mappings.insert(mapping.id, mapping);
        Ok(())
    }

    async fn update_mapping(&self, mapping: &EtMapping) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.mappings.insert(mapping.id, mapping.clone());
        Ok(())
    }

    async fn get_mapping(&self, id: MappingId) -> Result<EtMapping> {
        let inner = self.inner.lock().unwrap();
        inner
            .mappings
            .get(&id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("mapping {id}")))
    }

    async fn remap_latest_run(&self, from: ScanId, to: ScanId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for mapping in inner.mappings.values_mut() {
            if mapping.latest_scan == Some(from) {
                mapping.latest_scan = Some(to);
            }
        }
        Ok(())
    }

    async fn upload_by_id(&self, id: Uuid) -> Result<Option<UploadRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.uploads.get(&id).cloned())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn attach_result(
        &self,
        scan: ScanId,
        result: ScanResult,
    ) -> Result<AttachOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let binding = inner
            .bindings
            .get_mut(&scan)
            .ok_or_else(|| HubError::NotFound(format!("binding for {scan}")))?;
        if let Some(existing) = binding.result {
            return Ok(AttachOutcome::AlreadyLoaded(existing));
        }
        let id = result.id;
        binding.result = Some(id);
        inner.results.insert(id, result);
        Ok(AttachOutcome::Created(id))
    }

    async fn get_result(&self, id: ResultId) -> Result<ScanResult> {
        let inner = self.inner.lock().unwrap();
        inner
            .results
            .get(&id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("result {id}")))
    }

    async fn result_for_scan(
        &self,
        scan: ScanId,
    ) -> Result<Option<ScanResult>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .bindings
            .get(&scan)
            .and_then(|b| b.result)
            .and_then(|id| inner.results.get(&id).cloned()))
    }

    async fn insert_group(&self, group: ResultGroup) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.groups.insert(group.id, group);
        Ok(())
    }

    async fn update_group(&self, group: &ResultGroup) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.groups.contains_key(&group.id) {
            return Err(HubError::NotFound(format!("group {}", group.id)));
        }
        inner.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn get_group(&self, id: GroupId) -> Result<ResultGroup> {
        let inner = self.inner.lock().unwrap();
        inner
            .groups
            .get(&id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("group {id}")))
    }

    async fn groups_for_result(
        &self,
        result: ResultId,
    ) -> Result<Vec<ResultGroup>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .groups
            .values()
            .filter(|g| g.result == result)
            .cloned()
            .collect())
    }

    async fn insert_defects(&self, defects: Vec<Defect>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.defects.extend(defects);
        Ok(())
    }

    async fn defects_for_group(&self, group: GroupId) -> Result<Vec<Defect>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .defects
            .iter()
            .filter(|d| d.group == group)
            .cloned()
            .collect())
    }

    async fn set_defect_states(
        &self,
        group: GroupId,
        state: DefectKind,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for defect in inner.defects.iter_mut().filter(|d| d.group == group) {
            defect.state = state;
        }
        Ok(())
    }

    async fn assign_defect_orders(&self, group: GroupId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut counter = 0;
        for defect in inner.defects.iter_mut().filter(|d| d.group == group) {
            counter += 1;
            defect.order = Some(counter);
        }
        Ok(())
    }

    async fn groups_in_scope_since(
        &self,
        checker_group: &str,
        package: PackageId,
        release: ReleaseId,
        after: DateTime<Utc>,
        exclude: GroupId,
    ) -> Result<Vec<ResultGroup>> {
        let inner = self.inner.lock().unwrap();
        let mut matches = Vec::new();
        for group in inner.groups.values() {
            if group.id == exclude || group.checker_group != checker_group {
                continue;
            }
            let Some(result) = inner.results.get(&group.result) else {
                continue;
            };
            if result.submitted_at <= after {
                continue;
            }
            let owner = inner
                .bindings
                .values()
                .find(|b| b.result == Some(group.result))
                .and_then(|b| inner.scans.get(&b.scan));
            if owner
                .is_some_and(|scan| scope_matches(scan, package, release))
            {
                matches.push(group.clone());
            }
        }
        Ok(matches)
    }

    async fn scan_for_group(&self, group: GroupId) -> Result<Scan> {
        let inner = self.inner.lock().unwrap();
        let group = inner
            .groups
            .get(&group)
            .ok_or_else(|| HubError::NotFound(format!("group {group}")))?;
        inner
            .bindings
            .values()
            .find(|b| b.result == Some(group.result))
            .and_then(|b| inner.scans.get(&b.scan))
            .cloned()
            .ok_or_else(|| {
                HubError::NotFound(format!(
                    "scan owning group {}",
                    group.id
                ))
            })
    }
}

#[async_trait]
impl WaiverStore for MemoryStore {
    async fn insert_waiver(&self, waiver: Waiver) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.waivers.insert(waiver.id, waiver);
        Ok(())
    }

    async fn update_waiver(&self, waiver: &Waiver) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.waivers.contains_key(&waiver.id) {
            return Err(HubError::NotFound(format!("waiver {}", waiver.id)));
        }
        inner.waivers.insert(waiver.id, waiver.clone());
        Ok(())
    }

    async fn get_waiver(&self, id: WaiverId) -> Result<Waiver> {
        let inner = self.inner.lock().unwrap();
        inner
            .waivers
            .get(&id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("waiver {id}")))
    }

    async fn live_waivers_for_group(
        &self,
        group: GroupId,
    ) -> Result<Vec<Waiver>> {
        let inner = self.inner.lock().unwrap();
        let mut waivers: Vec<Waiver> = inner
            .waivers
            .values()
            .filter(|w| w.group == group && w.is_live())
            .cloned()
            .collect();
        waivers.sort_by_key(|w| std::cmp::Reverse(w.date));
        Ok(waivers)
    }

    async fn last_waiver_in_scope(
        &self,
        checker_group: &str,
        package: PackageId,
        release: ReleaseId,
        exclude_group: Option<GroupId>,
    ) -> Result<Option<Waiver>> {
        let inner = self.inner.lock().unwrap();
        let mut best: Option<Waiver> = None;
        for waiver in inner.waivers.values() {
            if !waiver.is_live() {
                continue;
            }
            if exclude_group == Some(waiver.group) {
                continue;
            }
            let Some(group) = inner.groups.get(&waiver.group) else {
                continue;
            };
            if group.checker_group != checker_group {
                continue;
            }
            let owner = inner
                .bindings
                .values()
                .find(|b| b.result == Some(group.result))
                .and_then(|b| inner.scans.get(&b.scan));
            if !owner
                .is_some_and(|scan| scope_matches(scan, package, release))
            {
                continue;
            }
            if best.as_ref().is_none_or(|b| waiver.date > b.date) {
                best = Some(waiver.clone());
            }
        }
        Ok(best)
    }

    async fn append_log(&self, log: WaivingLog) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.logs.push(log);
        Ok(())
    }

    async fn logs_for_waiver(
        &self,
        waiver: WaiverId,
    ) -> Result<Vec<WaivingLog>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .logs
            .iter()
            .filter(|log| log.waiver == waiver)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn environment_by_name(
        &self,
        name: &str,
    ) -> Result<Option<MockEnvironment>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.environments.get(name).cloned())
    }

    async fn release_mappings(&self) -> Result<Vec<ReleaseMapping>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.release_mappings.clone())
    }

    async fn tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tags.get(name).cloned())
    }

    async fn release_by_id(&self, id: ReleaseId) -> Result<Release> {
        let inner = self.inner.lock().unwrap();
        inner
            .releases
            .get(&id)
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("release {id}")))
    }

    async fn release_by_tag(&self, tag: &str) -> Result<Option<Release>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .releases
            .values()
            .find(|r| r.tag == tag)
            .cloned())
    }

    async fn package_by_name(&self, name: &str) -> Result<Option<Package>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .packages
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn get_or_create_package(&self, name: &str) -> Result<Package> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(package) =
            inner.packages.values().find(|p| p.name == name)
        {
            return Ok(package.clone());
        }
        let package = Package {
            id: PackageId::new(),
            name: name.to_string(),
            blocked: false,
            priority_offset: 0,
        };
        inner.packages.insert(package.id, package.clone());
        Ok(package)
    }

    async fn package_blocked_override(
        &self,
        package: PackageId,
        release: ReleaseId,
    ) -> Result<Option<bool>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .package_attrs
            .iter()
            .find(|attr| attr.package == package && attr.release == release)
            .map(|attr| attr.blocked))
    }

    async fn analyzers(&self) -> Result<Vec<ClientAnalyzer>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.analyzers.clone())
    }

    async fn analyzer_by_cli_name(
        &self,
        name: &str,
    ) -> Result<Option<ClientAnalyzer>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .analyzers
            .iter()
            .find(|a| a.cli_name == name)
            .cloned())
    }

    async fn profile_by_name(&self, name: &str) -> Result<Option<Profile>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.profiles.get(name).cloned())
    }

    async fn profiles(&self) -> Result<Vec<Profile>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.profiles.values().cloned().collect())
    }

    async fn checker_group_for(
        &self,
        checker: &str,
    ) -> Result<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.checkers.get(checker).cloned())
    }

    async fn ensure_checker(&self, checker: &str, group: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .checkers
            .entry(checker.to_string())
            .or_insert_with(|| group.to_string());
        Ok(())
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn snapshot(
        &self,
        environment: &str,
    ) -> Result<Vec<AnalyzerVersionSnapshot>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .get(environment)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_snapshot(
        &self,
        environment: &str,
        versions: &[AnalyzerVersionPair],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.snapshots.insert(
            environment.to_string(),
            versions
                .iter()
                .map(|pair| AnalyzerVersionSnapshot {
                    environment: environment.to_string(),
                    analyzer: pair.name.clone(),
                    version: pair.version.clone(),
                    captured_at: at,
                })
                .collect(),
        );
        inner.refreshed.insert(environment.to_string(), at);
        Ok(())
    }

    async fn last_refreshed(
        &self,
        environment: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.refreshed.get(environment).copied())
    }
}

/// In-memory task broker mirroring the state transitions the hub relies
/// on.
#[derive(Default)]
pub struct MemoryBroker {
    jobs: Mutex<HashMap<JobId, JobInfo>>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker").finish_non_exhaustive()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, spec: JobSpec, parent: Option<JobId>) -> JobId {
        let id = JobId::new();
        let info = JobInfo {
            id,
            method: spec.method,
            label: spec.label,
            owner: spec.owner,
            priority: spec.priority,
            comment: spec.comment,
            state: JobState::Free,
            args: spec.args,
            parent,
            created_at: Utc::now(),
            finished_at: None,
            note: None,
        };
        self.jobs.lock().unwrap().insert(id, info);
        id
    }
}

#[async_trait]
impl TaskBroker for MemoryBroker {
    async fn create_job(&self, spec: JobSpec) -> Result<JobId> {
        Ok(self.insert(spec, None))
    }

    async fn create_sub_job(
        &self,
        parent: JobId,
        spec: JobSpec,
    ) -> Result<JobId> {
        Ok(self.insert(spec, Some(parent)))
    }

    async fn cancel_job(&self, id: JobId) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| HubError::Broker(format!("job {id} is unknown")))?;
        if !job.state.is_cancellable() {
            return Ok(false);
        }
        job.state = JobState::Canceled;
        job.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn job_info(&self, id: JobId) -> Result<Option<JobInfo>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn find_jobs(&self, query: &JobQuery) -> Result<Vec<JobId>> {
        let jobs = self.jobs.lock().unwrap();
        let label_re = match (&query.package_name, &query.regex) {
            (Some(name), _) => {
                Some(Regex::new(&format!("{}-\\d", regex::escape(name))).map_err(
                    |err| HubError::Validation(err.to_string()),
                )?)
            }
            (None, Some(pattern)) => Some(
                Regex::new(pattern)
                    .map_err(|err| HubError::Validation(err.to_string()))?,
            ),
            (None, None) => None,
        };
        let comment_re = match &query.comment {
            Some(pattern) => Some(
                Regex::new(pattern)
                    .map_err(|err| HubError::Validation(err.to_string()))?,
            ),
            None => None,
        };

        let mut matches: Vec<&JobInfo> = jobs
            .values()
            .filter(|job| match (&query.label, &label_re, &comment_re) {
                (Some(label), _, _) => job.label == *label,
                (None, Some(re), _) => re.is_match(&job.label),
                (None, None, Some(re)) => re.is_match(&job.comment),
                (None, None, None) => false,
            })
            .filter(|job| {
                query.states.is_empty() || query.states.contains(&job.state)
            })
            .collect();

        // newest finished first, unfinished at the tail
        matches.sort_by_key(|job| match job.finished_at {
            Some(at) => (0, std::cmp::Reverse(at.timestamp())),
            None => (1, std::cmp::Reverse(job.created_at.timestamp())),
        });
        let mut ids: Vec<JobId> = matches.iter().map(|job| job.id).collect();
        if query.latest {
            ids.truncate(1);
        }
        Ok(ids)
    }

    async fn set_job_state(&self, id: JobId, state: JobState) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| HubError::Broker(format!("job {id} is unknown")))?;
        job.state = state;
        if state.is_finished() {
            job.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_job_note(&self, id: JobId, note: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| HubError::Broker(format!("job {id} is unknown")))?;
        job.note = Some(note.to_string());
        Ok(())
    }
}
