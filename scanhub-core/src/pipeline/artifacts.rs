//! Filesystem-backed result artifacts and the external diff runner.
//!
//! Artifact naming is fixed: the raw report unpacks to
//! `<job dir>/<nvr>/scan-results.js`, and the derived diff artifacts are
//! `<job dir>/added.js` and `<job dir>/fixed.js`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use scanhub_config::ResultsConfig;
use scanhub_model::{JobId, ScanReport};

use crate::error::{HubError, Result};
use crate::external::{DefectDiffer, ResultArtifacts};

/// Raw report filename inside the unpacked result tree.
pub const SCAN_RESULTS_FILENAME: &str = "scan-results.js";
/// Newly-introduced defects artifact.
pub const ADDED_DIFF_FILE: &str = "added.js";
/// Fixed defects artifact.
pub const FIXED_DIFF_FILE: &str = "fixed.js";

/// Artifacts laid out under one directory per job.
#[derive(Clone, Debug)]
pub struct FsResultArtifacts {
    config: ResultsConfig,
}

impl FsResultArtifacts {
    pub fn new(config: ResultsConfig) -> Self {
        Self { config }
    }

    pub fn job_dir(&self, job: JobId) -> PathBuf {
        self.config.work_dir.join(job.to_string())
    }

    /// The result tarball dropped by the worker. A results tarball ends in
    /// `.tar.xz`; when an analyzed upstream tarball sits beside it, the
    /// `-results` one sorts last.
    async fn tarball_path(&self, job: JobId) -> Result<PathBuf> {
        let dir = self.job_dir(job);
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut tarballs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".tar.xz") {
                tarballs.push(entry.path());
            }
        }
        tarballs.sort();
        let count = tarballs.len();
        match tarballs.pop() {
            Some(path) if count <= 2 => Ok(path),
            _ => Err(HubError::Pipeline(format!(
                "can't figure out results tarball for job {job}: \
                 {count} candidates in {}",
                dir.display()
            ))),
        }
    }

    async fn read_report_file(&self, path: &Path) -> Result<ScanReport> {
        let raw = tokio::fs::read(path).await.map_err(|err| {
            HubError::Pipeline(format!(
                "cannot read report {}: {err}",
                path.display()
            ))
        })?;
        serde_json::from_slice(&raw).map_err(|err| {
            HubError::Pipeline(format!(
                "malformed report {}: {err}",
                path.display()
            ))
        })
    }
}

#[async_trait]
impl ResultArtifacts for FsResultArtifacts {
    async fn unpack_results(&self, job: JobId, nvr: &str) -> Result<()> {
        if self.has_results(job, nvr).await? {
            info!(%job, "results are already unpacked");
            return Ok(());
        }
        let tarball = self.tarball_path(job).await?;
        debug!(tarball = %tarball.display(), "unpacking results");

        let mut command = Command::new("tar");
        command
            .arg("-xJf")
            .arg(&tarball)
            .arg("-C")
            .arg(self.job_dir(job));
        for dir in &self.config.exclude_dirs {
            command.arg(format!("--exclude={dir}"));
        }
        let status = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(HubError::Pipeline(format!(
                "unpacking {} failed with {status}",
                tarball.display()
            )));
        }
        Ok(())
    }

    async fn has_results(&self, job: JobId, nvr: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.report_path(job, nvr)).await?)
    }

    async fn has_diffs(&self, job: JobId) -> Result<bool> {
        let added = tokio::fs::try_exists(self.added_path(job)).await?;
        let fixed = tokio::fs::try_exists(self.fixed_path(job)).await?;
        Ok(added && fixed)
    }

    fn report_path(&self, job: JobId, nvr: &str) -> PathBuf {
        self.job_dir(job).join(nvr).join(SCAN_RESULTS_FILENAME)
    }

    fn added_path(&self, job: JobId) -> PathBuf {
        self.job_dir(job).join(ADDED_DIFF_FILE)
    }

    fn fixed_path(&self, job: JobId) -> PathBuf {
        self.job_dir(job).join(FIXED_DIFF_FILE)
    }

    async fn read_report(&self, job: JobId, nvr: &str) -> Result<ScanReport> {
        self.read_report_file(&self.report_path(job, nvr)).await
    }

    async fn read_added(&self, job: JobId) -> Result<ScanReport> {
        self.read_report_file(&self.added_path(job)).await
    }

    async fn read_fixed(&self, job: JobId) -> Result<ScanReport> {
        self.read_report_file(&self.fixed_path(job)).await
    }
}

/// Diff runner shelling out to `csdiff`. The output lands under a temp name
/// and is renamed into place only on success, so a crashed invocation can
/// never satisfy the presence guard on retry.
#[derive(Clone, Debug, Default)]
pub struct CsdiffRunner;

#[async_trait]
impl DefectDiffer for CsdiffRunner {
    async fn diff(&self, old: &Path, new: &Path, out: &Path) -> Result<()> {
        let tmp = out.with_extension("tmp");
        let tmp_file = std::fs::File::create(&tmp)?;
        let status = Command::new("csdiff")
            .arg("-jz")
            .arg(old)
            .arg(new)
            .stdout(Stdio::from(tmp_file))
            .stderr(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            error!(
                old = %old.display(),
                new = %new.display(),
                "csdiff failed with {status}"
            );
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(HubError::Pipeline(format!(
                "csdiff of {} and {} failed with {status}",
                old.display(),
                new.display()
            )));
        }
        tokio::fs::rename(&tmp, out).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts(dir: &Path) -> FsResultArtifacts {
        FsResultArtifacts::new(ResultsConfig {
            work_dir: dir.to_path_buf(),
            exclude_dirs: Vec::new(),
        })
    }

    #[tokio::test]
    async fn artifact_paths_follow_the_naming_scheme() {
        let tmp = tempfile::tempdir().unwrap();
        let store = artifacts(tmp.path());
        let job = JobId::new();
        assert!(
            store
                .report_path(job, "expat-2.5.0-1.el9")
                .ends_with("expat-2.5.0-1.el9/scan-results.js")
        );
        assert!(store.added_path(job).ends_with("added.js"));
        assert!(store.fixed_path(job).ends_with("fixed.js"));
    }

    #[tokio::test]
    async fn unpack_skips_when_report_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = artifacts(tmp.path());
        let job = JobId::new();
        let nvr = "expat-2.5.0-1.el9";
        let report_dir = store.job_dir(job).join(nvr);
        std::fs::create_dir_all(&report_dir).unwrap();
        std::fs::write(
            report_dir.join(SCAN_RESULTS_FILENAME),
            r#"{"defects": []}"#,
        )
        .unwrap();

        // no tarball exists, so this would fail were it not skipped
        store.unpack_results(job, nvr).await.unwrap();
        assert!(store.has_results(job, nvr).await.unwrap());
    }

    #[tokio::test]
    async fn missing_diff_artifacts_are_reported_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = artifacts(tmp.path());
        let job = JobId::new();
        std::fs::create_dir_all(store.job_dir(job)).unwrap();
        assert!(!store.has_diffs(job).await.unwrap());
        std::fs::write(store.added_path(job), "{}").unwrap();
        // one of two is not enough for the idempotence guard
        assert!(!store.has_diffs(job).await.unwrap());
        std::fs::write(store.fixed_path(job), "{}").unwrap();
        assert!(store.has_diffs(job).await.unwrap());
    }
}
