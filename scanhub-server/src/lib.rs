//! # scanhub server
//!
//! HTTP surface of the scan orchestration hub. Three groups of routes:
//!
//! - **Client API** (`/api/v1/scans`, `/api/v1/tasks`, `/api/v1/analyzers`,
//!   `/api/v1/profiles`): scan submission and queries.
//! - **Release-tool API** (`/api/v1/errata`): the always-structured
//!   submission entry point and the state poll keyed by mapping id.
//! - **Worker callbacks** (`/worker`): state transitions, completion and
//!   failure reports, baseline and version-cache preparation.
//!
//! The server carries no decision logic of its own; every handler forwards
//! to the services in `scanhub-core`.

pub mod api;
pub mod app_state;
pub mod handlers;
pub mod routes;

pub use api::{ApiResponse, HubHttpError};
pub use app_state::AppState;
pub use routes::create_api_router;
