use axum::Router;
use axum::routing::{get, post};

use crate::AppState;
use crate::handlers::{errata, scan, worker};

/// Create the main API router with the client, release-tool, and worker
/// surfaces.
pub fn create_api_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/scans/mock-build", post(scan::mock_build_handler))
        .route("/scans/diff-build", post(scan::diff_build_handler))
        .route("/scans/user-diff", post(scan::user_diff_handler))
        .route("/scans/find", post(scan::find_scans_handler))
        .route("/scans/{scan_id}/rescan", post(scan::rescan_handler))
        .route("/tasks/find", post(scan::find_tasks_handler))
        .route("/tasks/{job_id}", get(scan::task_info_handler))
        .route("/analyzers", get(scan::list_analyzers_handler))
        .route("/analyzers/check", post(scan::check_analyzers_handler))
        .route("/profiles", get(scan::list_profiles_handler))
        .route("/errata/scans", post(errata::create_errata_scan_handler))
        .route(
            "/errata/scans/{mapping_id}",
            get(errata::scan_state_handler),
        );

    let worker = Router::new()
        .route(
            "/scans/{scan_id}/scanning",
            post(worker::set_scanning_handler),
        )
        .route(
            "/scans/{scan_id}/basescanning",
            post(worker::set_base_scanning_handler),
        )
        .route("/scans/{scan_id}/finish", post(worker::finish_scan_handler))
        .route("/scans/{scan_id}/fail", post(worker::fail_scan_handler))
        .route(
            "/scans/{scan_id}/ensure-base",
            post(worker::ensure_base_handler),
        )
        .route("/ensure-cache", post(worker::ensure_cache_handler))
        .route(
            "/tasks/{job_id}/versions",
            post(worker::finish_version_retrieval_handler),
        )
        .route("/tasks/{job_id}/finish", post(worker::finish_task_handler))
        .route(
            "/tasks/{job_id}/binding",
            post(worker::create_binding_handler),
        );

    Router::new()
        .nest("/api/v1", api)
        .nest("/worker", worker)
        .with_state(state)
}
