//! Boundaries to the external collaborators.
//!
//! The worker-pool substrate, the build system, artifact handling for result
//! tarballs, the defect differ, and state-change notification are all
//! consumed through these traits; the core never blocks on any of them
//! beyond a single request/response call.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scanhub_model::{JobId, ModelError, Scan, ScanReport, ScanState};

use crate::error::Result;

/// Description of one unit of work handed to the worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSpec {
    /// Worker method, e.g. `ErrataDiffBuild`, `MockBuild`,
    /// `VersionDiffBuild`, `AnalyzerVersionRetriever`.
    pub method: String,
    /// Human-facing label; the target NVR or uploaded file name.
    pub label: String,
    pub owner: String,
    pub priority: i32,
    pub comment: String,
    /// Opaque argument bag passed through to the worker.
    pub args: serde_json::Value,
}

impl JobSpec {
    pub fn new(method: &str, label: &str, owner: &str) -> Self {
        Self {
            method: method.to_string(),
            label: label.to_string(),
            owner: owner.to_string(),
            priority: 10,
            comment: String::new(),
            args: serde_json::json!({}),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    pub fn set_arg(&mut self, key: &str, value: serde_json::Value) {
        if let Some(map) = self.args.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// Broker-side job states mirrored by the core. Only "can it still be
/// cancelled" and "did it finish" matter here; assignment and heartbeats are
/// the broker's business.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Free,
    Assigned,
    Open,
    Closed,
    Canceled,
    Failed,
    Interrupted,
}

impl JobState {
    /// Cancellation is cooperative: only jobs that have not started
    /// executing can be cancelled.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Created | Self::Free | Self::Assigned)
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Canceled | Self::Failed | Self::Interrupted
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Free => "FREE",
            Self::Assigned => "ASSIGNED",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
            Self::Interrupted => "INTERRUPTED",
        };
        write!(f, "{name}")
    }
}

impl FromStr for JobState {
    type Err = ModelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "FREE" => Ok(Self::Free),
            "ASSIGNED" => Ok(Self::Assigned),
            "OPEN" => Ok(Self::Open),
            "CLOSED" => Ok(Self::Closed),
            "CANCELED" => Ok(Self::Canceled),
            "FAILED" => Ok(Self::Failed),
            "INTERRUPTED" => Ok(Self::Interrupted),
            other => Err(ModelError::UnknownVariant {
                kind: "job state",
                value: other.to_string(),
            }),
        }
    }
}

/// Broker-side view of a job, as much of it as the core ever reads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub method: String,
    pub label: String,
    pub owner: String,
    pub priority: i32,
    pub comment: String,
    pub state: JobState,
    pub args: serde_json::Value,
    pub parent: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Free-form note, e.g. the failure reason.
    pub note: Option<String>,
}

/// Query shape for `find_tasks`: exactly one of the match fields applies.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobQuery {
    /// Exact label match (target NVR).
    pub label: Option<String>,
    /// Package name; matched as `<name>-<digit>` label prefix.
    pub package_name: Option<String>,
    /// Free-form regex, find semantics (anchor it yourself for match).
    pub regex: Option<String>,
    /// Regex over the job comment.
    pub comment: Option<String>,
    /// Optional state filter.
    #[serde(default)]
    pub states: Vec<JobState>,
    /// Truncate to the single newest job server-side.
    #[serde(default)]
    pub latest: bool,
}

/// The job queue / worker pool substrate.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    async fn create_job(&self, spec: JobSpec) -> Result<JobId>;

    /// Spawn `spec` as a sub-job of `parent`, run before it.
    async fn create_sub_job(&self, parent: JobId, spec: JobSpec)
    -> Result<JobId>;

    /// Cancel iff the job has not started executing. Returns whether the
    /// job was actually cancelled.
    async fn cancel_job(&self, id: JobId) -> Result<bool>;

    async fn job_info(&self, id: JobId) -> Result<Option<JobInfo>>;

    /// Ordered newest-finished-first, unfinished last.
    async fn find_jobs(&self, query: &JobQuery) -> Result<Vec<JobId>>;

    async fn set_job_state(&self, id: JobId, state: JobState) -> Result<()>;

    /// Attach a free-form note, e.g. a failure reason.
    async fn set_job_note(&self, id: JobId, note: &str) -> Result<()>;
}

/// Metadata the build system reports about an existing build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub nvr: String,
    /// Container images are routed to the high-throughput environment.
    pub is_container: bool,
    /// Tag the build originated from; drives automatic environment
    /// selection.
    pub origin_tag: Option<String>,
}

/// Lookup boundary to the build system (koji/brew-like).
#[async_trait]
pub trait BuildSystem: Send + Sync {
    async fn lookup_build(&self, nvr: &str) -> Result<Option<BuildInfo>>;
}

/// Build-system stub used when no integration is configured: every NVR is
/// assumed to exist, with no origin metadata. Automatic environment
/// selection is unavailable with this implementation.
#[derive(Debug, Default, Clone)]
pub struct PermissiveBuildSystem;

#[async_trait]
impl BuildSystem for PermissiveBuildSystem {
    async fn lookup_build(&self, nvr: &str) -> Result<Option<BuildInfo>> {
        Ok(Some(BuildInfo {
            nvr: nvr.to_string(),
            is_container: false,
            origin_tag: None,
        }))
    }
}

/// Filesystem-shaped access to a job's result artifacts. Presence checks
/// drive the pipeline's idempotence guards.
#[async_trait]
pub trait ResultArtifacts: Send + Sync {
    /// Extract the result tarball into the job directory. Skips silently
    /// when the unpacked report already exists.
    async fn unpack_results(&self, job: JobId, nvr: &str) -> Result<()>;

    async fn has_results(&self, job: JobId, nvr: &str) -> Result<bool>;

    async fn has_diffs(&self, job: JobId) -> Result<bool>;

    fn report_path(&self, job: JobId, nvr: &str) -> PathBuf;

    fn added_path(&self, job: JobId) -> PathBuf;

    fn fixed_path(&self, job: JobId) -> PathBuf;

    async fn read_report(&self, job: JobId, nvr: &str) -> Result<ScanReport>;

    async fn read_added(&self, job: JobId) -> Result<ScanReport>;

    async fn read_fixed(&self, job: JobId) -> Result<ScanReport>;
}

/// The external diff operation over two report files. `out` must appear
/// atomically: implementations write to a temp name and rename on success so
/// a failed invocation never leaves an artifact that passes the presence
/// guard on retry.
#[async_trait]
pub trait DefectDiffer: Send + Sync {
    async fn diff(
        &self,
        old: &std::path::Path,
        new: &std::path::Path,
        out: &std::path::Path,
    ) -> Result<()>;
}

/// State-change notification boundary. Invoked exactly once per real
/// transition, never on a no-op.
#[async_trait]
pub trait ScanNotifier: Send + Sync {
    async fn scan_state_changed(
        &self,
        scan: &Scan,
        old: ScanState,
        new: ScanState,
    );
}

/// Default notifier: structured log lines only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl ScanNotifier for LogNotifier {
    async fn scan_state_changed(
        &self,
        scan: &Scan,
        old: ScanState,
        new: ScanState,
    ) {
        tracing::info!(
            scan = %scan.id,
            nvr = %scan.nvr,
            %old,
            %new,
            "scan state changed"
        );
    }
}
