//! Release-tool integration endpoints.
//!
//! The submission endpoint never surfaces an internal error to the caller:
//! every outcome, including a crash during scheduling, comes back as
//! `{status, message, id}` and is recorded on the persisted mapping so the
//! state stays queryable.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use scanhub_core::scheduler::request::{
    ErrataResponse, ErrataScanState, ErrataSubmission,
};
use scanhub_model::MappingId;

use crate::api::HubHttpError;
use crate::app_state::AppState;
use crate::handlers::principal_from_headers;

/// Wire shape the release tool submits: `id` is its internal scan record,
/// `errata_id` the advisory the build belongs to.
#[derive(Debug, Deserialize)]
pub struct ErrataWireRequest {
    pub id: String,
    pub errata_id: String,
    pub target: String,
    pub base: String,
    pub release: String,
    pub package_owner: String,
}

pub async fn create_errata_scan_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ErrataWireRequest>,
) -> Json<ErrataResponse> {
    let principal = principal_from_headers(&headers);
    let submission = ErrataSubmission {
        target: request.target,
        base: request.base,
        release: request.release,
        package_owner: request.package_owner,
        advisory_id: request.errata_id,
        external_scan_id: request.id,
    };
    Json(
        state
            .scheduler
            .handle_errata_request(submission, &principal)
            .await,
    )
}

pub async fn scan_state_handler(
    State(state): State<AppState>,
    Path(mapping_id): Path<Uuid>,
) -> Result<Json<ErrataScanState>, HubHttpError> {
    let response = state
        .scheduler
        .errata_scan_state(MappingId(mapping_id))
        .await?;
    Ok(Json(response))
}
