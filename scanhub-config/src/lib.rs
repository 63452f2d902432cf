//! Shared configuration library for scanhub.
//!
//! Centralizes config loading and validation so the server binary and the
//! core services share a single source of truth for defaults. The resulting
//! [`HubConfig`] is an explicit struct threaded through constructors; no
//! module-level configuration singleton exists anywhere in the workspace.

pub mod loader;
pub mod models;

pub use loader::{ConfigLoadError, load_config};
pub use models::{
    DatabaseConfig, HubConfig, ResultsConfig, ScanningConfig, ServerConfig,
};
