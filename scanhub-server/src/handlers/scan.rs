//! Client-facing scan submission and query handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scanhub_core::external::{JobInfo, JobQuery, TaskBroker};
use scanhub_core::persistence::{ScanQuery, ScanStore};
use scanhub_core::scheduler::request::{
    UserDiffSubmission, UserScanSubmission,
};
use scanhub_model::{JobId, Scan, ScanBinding, ScanId};

use crate::api::{ApiResponse, HubHttpError};
use crate::app_state::AppState;
use crate::handlers::principal_from_headers;

/// Cap on `find_scans` results.
const DEFAULT_SCAN_LIMIT: usize = 1000;

pub async fn mock_build_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(submission): Json<UserScanSubmission>,
) -> Result<impl IntoResponse, HubHttpError> {
    let principal = principal_from_headers(&headers);
    let binding = state
        .scheduler
        .submit_user_scan(submission, &principal)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(binding))))
}

/// Same shape as `mock-build`, but analyzes the downstream patches only.
pub async fn diff_build_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut submission): Json<UserScanSubmission>,
) -> Result<impl IntoResponse, HubHttpError> {
    submission.diff_patches = true;
    let principal = principal_from_headers(&headers);
    let binding = state
        .scheduler
        .submit_user_scan(submission, &principal)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(binding))))
}

pub async fn user_diff_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(submission): Json<UserDiffSubmission>,
) -> Result<impl IntoResponse, HubHttpError> {
    let principal = principal_from_headers(&headers);
    let binding = state
        .scheduler
        .submit_user_diff(submission, &principal)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(binding))))
}

pub async fn rescan_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ScanBinding>>, HubHttpError> {
    let principal = principal_from_headers(&headers);
    let binding = state
        .scheduler
        .rescan(ScanId(scan_id), &principal)
        .await?;
    Ok(Json(ApiResponse::success(binding)))
}

/// Wire shape of the scan-list filter: the state arrives by name.
#[derive(Debug, Deserialize)]
pub struct ScanListQuery {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScanListEntry {
    pub id: ScanId,
    pub target: String,
    pub scan_type: scanhub_model::ScanType,
    pub state: scanhub_model::ScanState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_target: Option<String>,
    pub owner_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    pub is_enabled: bool,
    pub date_submitted: chrono::DateTime<chrono::Utc>,
    pub date_last_accessed: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct FilteredScanList {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub count: usize,
    pub scans: Vec<ScanListEntry>,
}

pub async fn find_scans_handler(
    State(state): State<AppState>,
    Json(query): Json<ScanListQuery>,
) -> Result<Json<FilteredScanList>, HubHttpError> {
    let parsed_state = match query.state.as_deref() {
        Some(name) => match name.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                return Ok(Json(FilteredScanList {
                    status: "ERROR",
                    message: Some(format!(
                        "Scan state {name} does not exist."
                    )),
                    count: 0,
                    scans: Vec::new(),
                }));
            }
        },
        None => None,
    };

    let scans = state
        .scans
        .find_scans(&ScanQuery {
            id: query.id.map(ScanId),
            target: query.target,
            base: query.base,
            state: parsed_state,
            owner: query.owner,
            release: query.release,
        })
        .await?;

    let truncated = scans.len() > DEFAULT_SCAN_LIMIT;
    let mut entries = Vec::with_capacity(scans.len().min(DEFAULT_SCAN_LIMIT));
    for scan in scans.iter().take(DEFAULT_SCAN_LIMIT) {
        entries.push(scan_list_entry(&state, scan).await?);
    }

    Ok(Json(FilteredScanList {
        status: if truncated { "ERROR" } else { "OK" },
        message: truncated.then(|| {
            format!(
                "Limit exceeded, returning first {DEFAULT_SCAN_LIMIT} scans."
            )
        }),
        count: entries.len(),
        scans: entries,
    }))
}

async fn scan_list_entry(
    state: &AppState,
    scan: &Scan,
) -> Result<ScanListEntry, HubHttpError> {
    let base_target = match scan.base {
        Some(base) => Some(state.scans.get_scan(base).await?.nvr),
        None => None,
    };
    let release = match scan.release {
        Some(id) => Some(state.catalog.release(id).await?.tag),
        None => None,
    };
    Ok(ScanListEntry {
        id: scan.id,
        target: scan.nvr.clone(),
        scan_type: scan.scan_type,
        state: scan.state,
        base_target,
        owner_name: scan.owner.clone(),
        release,
        is_enabled: scan.enabled,
        date_submitted: scan.submitted_at,
        date_last_accessed: scan.last_access,
    })
}

pub async fn find_tasks_handler(
    State(state): State<AppState>,
    Json(query): Json<JobQuery>,
) -> Result<Json<Vec<JobId>>, HubHttpError> {
    Ok(Json(state.broker.find_jobs(&query).await?))
}

pub async fn task_info_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Option<JobInfo>>>, HubHttpError> {
    let info = state.broker.job_info(JobId(job_id)).await?;
    Ok(Json(ApiResponse::success(info)))
}

#[derive(Debug, Deserialize)]
pub struct CheckAnalyzersRequest {
    pub analyzers: String,
}

/// `null` when every analyzer in the chain is available, otherwise the
/// first offending analyzer's message.
pub async fn check_analyzers_handler(
    State(state): State<AppState>,
    Json(request): Json<CheckAnalyzersRequest>,
) -> Result<Json<Option<String>>, HubHttpError> {
    Ok(Json(
        state.catalog.check_analyzers(&request.analyzers).await?,
    ))
}

pub async fn list_analyzers_handler(
    State(state): State<AppState>,
) -> Result<
    Json<ApiResponse<Vec<scanhub_model::ClientAnalyzer>>>,
    HubHttpError,
> {
    Ok(Json(ApiResponse::success(
        state.catalog.list_analyzers().await?,
    )))
}

pub async fn list_profiles_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<scanhub_model::Profile>>>, HubHttpError> {
    Ok(Json(ApiResponse::success(
        state.catalog.list_profiles().await?,
    )))
}
