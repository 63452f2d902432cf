//! Worker callback surface.
//!
//! Workers report lifecycle transitions and completions here; the handlers
//! only hand off to the core services. Completion handling is idempotent,
//! so a worker retrying a callback after a network failure is harmless.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use scanhub_core::external::{JobSpec, JobState, TaskBroker};
use scanhub_core::persistence::ScanStore;
use scanhub_model::{JobId, ScanId};

use crate::api::{ApiResponse, HubHttpError};
use crate::app_state::AppState;

pub async fn set_scanning_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<StatusCode, HubHttpError> {
    state.lifecycle.mark_scanning(ScanId(scan_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_base_scanning_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<StatusCode, HubHttpError> {
    state.lifecycle.mark_base_scanning(ScanId(scan_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Payload of `finish` / `fail` callbacks. The tarball name is part of the
/// wire contract; the artifact layout derives everything from the job id
/// and NVR, so it is accepted and not otherwise needed.
#[derive(Debug, Deserialize)]
pub struct FinishScanRequest {
    #[allow(dead_code)]
    pub filename: String,
}

pub async fn finish_scan_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
    Json(_request): Json<FinishScanRequest>,
) -> Result<StatusCode, HubHttpError> {
    state.pipeline.on_job_finished(ScanId(scan_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct FailScanRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn fail_scan_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
    Json(request): Json<FailScanRequest>,
) -> Result<StatusCode, HubHttpError> {
    let reason = request
        .reason
        .unwrap_or_else(|| "Unspecified failure".to_string());
    state
        .pipeline
        .on_job_failed(ScanId(scan_id), &reason)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct EnsureBaseRequest {
    pub job_id: Uuid,
}

/// Returns the baseline sub-job the worker must spawn before the target
/// job, or nothing when a prior scan serves as the baseline.
pub async fn ensure_base_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
    Json(request): Json<EnsureBaseRequest>,
) -> Result<Json<ApiResponse<Option<JobSpec>>>, HubHttpError> {
    let spec = state
        .scheduler
        .ensure_base_scanned(ScanId(scan_id), JobId(request.job_id))
        .await?;
    Ok(Json(ApiResponse::success(spec)))
}

#[derive(Debug, Deserialize)]
pub struct EnsureCacheRequest {
    pub environment: String,
    pub profile: String,
}

/// Returns the version-probe sub-job when the environment's analyzer
/// snapshot is stale.
pub async fn ensure_cache_handler(
    State(state): State<AppState>,
    Json(request): Json<EnsureCacheRequest>,
) -> Result<Json<ApiResponse<Option<JobSpec>>>, HubHttpError> {
    let spec = state
        .scheduler
        .ensure_cache(&request.environment, &request.profile)
        .await?;
    Ok(Json(ApiResponse::success(spec)))
}

#[derive(Debug, Deserialize)]
pub struct VersionRetrievalReport {
    pub analyzers: Vec<scanhub_model::AnalyzerVersionPair>,
}

/// A version-probe sub-job finished: replace the environment's analyzer
/// snapshot with what it observed.
pub async fn finish_version_retrieval_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(report): Json<VersionRetrievalReport>,
) -> Result<StatusCode, HubHttpError> {
    let job = JobId(job_id);
    let info = state.broker.job_info(job).await?.ok_or_else(|| {
        scanhub_core::HubError::Broker(format!("job {job} is unknown"))
    })?;
    let environment = info
        .args
        .get("mock_config")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            scanhub_core::HubError::Broker(format!(
                "job {job} names no environment"
            ))
        })?;
    state
        .versions
        .apply_versions(environment, &report.analyzers)
        .await?;
    state.broker.set_job_state(job, JobState::Closed).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Close a job and process its scan's results when one is bound to it.
pub async fn finish_task_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HubHttpError> {
    let job = JobId(job_id);
    state.broker.set_job_state(job, JobState::Closed).await?;
    if let Some(binding) = state.scans.binding_for_job(job).await? {
        state.pipeline.on_job_finished(binding.scan).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Bind a worker-spawned sub-job to the scan named in its args.
pub async fn create_binding_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, HubHttpError> {
    state
        .scheduler
        .create_binding_for_job(JobId(job_id))
        .await?;
    Ok(StatusCode::CREATED)
}
