use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration for the hub.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scanning: ScanningConfig,
    pub results: ResultsConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            scanning: ScanningConfig::default(),
            results: ResultsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

/// Knobs of the scheduling and base-reuse engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    /// Hours before the per-environment analyzer version snapshot goes
    /// stale and a refresh probe is spawned.
    pub version_cache_ttl_hours: i64,
    /// Analyzers whose upstream version is outside the hub's control;
    /// base-reuse checks their presence only, never the exact version.
    pub version_exempt_analyzers: Vec<String>,
    /// Base task priority before the package offset is applied.
    pub default_priority: i32,
    /// Explicit priorities at or above this require an elevated principal.
    pub elevated_priority_threshold: i32,
    /// Environment substituted when the source build is a container image.
    pub container_environment: String,
    /// Fixed priority for scans routed to the container environment.
    pub container_priority: i32,
    /// Profile applied when a submission names none.
    pub default_profile: String,
    /// Package name prefixes that are never scanned.
    pub ineligible_name_prefixes: Vec<String>,
    /// Package name suffixes that are never scanned.
    pub ineligible_name_suffixes: Vec<String>,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            version_cache_ttl_hours: 24,
            version_exempt_analyzers: vec![
                "gcc".to_string(),
                "gcc-analyzer".to_string(),
                "clang".to_string(),
            ],
            default_priority: 10,
            elevated_priority_threshold: 20,
            container_environment: "cspodman".to_string(),
            container_priority: 8,
            default_profile: "default".to_string(),
            ineligible_name_prefixes: vec!["kpatch-patch".to_string()],
            ineligible_name_suffixes: vec!["-container".to_string()],
        }
    }
}

/// Where job artifacts land and how tarballs are unpacked.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Root directory holding one subdirectory per job.
    pub work_dir: PathBuf,
    /// Directories stripped while unpacking result tarballs.
    pub exclude_dirs: Vec<String>,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/var/lib/scanhub/tasks"),
            exclude_dirs: Vec::new(),
        }
    }
}
