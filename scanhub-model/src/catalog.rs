//! Read-only reference data: packages, releases, environments, analyzers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EnvironmentId, PackageId, ReleaseId};

/// A package known to the hub. Linked directly to scans.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub name: String,
    /// Blocked packages are not accepted for scanning (any release).
    pub blocked: bool,
    /// Added to the default priority when scheduling this package's scans.
    pub priority_offset: i16,
}

/// Per-release override of the package block flag. When present it wins over
/// [`Package::blocked`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageReleaseAttribute {
    pub package: PackageId,
    pub release: ReleaseId,
    pub blocked: bool,
}

/// A product release scans are submitted for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    /// Short tag, e.g. `rhel-9.2`.
    pub tag: String,
    pub product: String,
    pub version: String,
    pub active: bool,
    /// Child releases inherit scan history from their parent.
    pub parent: Option<ReleaseId>,
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -- {} {}", self.tag, self.product, self.version)
    }
}

/// A build environment (mock config) scans execute in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MockEnvironment {
    pub id: EnvironmentId,
    pub name: String,
    pub enabled: bool,
}

/// Mapping between a build-system tag and the environment + release used for
/// builds carrying it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub environment: String,
    pub release: ReleaseId,
}

/// Ordered regex rule resolving a raw release string to a tag name. The
/// template receives the regex capture groups.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReleaseMapping {
    /// Regular expression matched against the release string.
    pub release_pattern: String,
    /// Template filled with the regex captures, yielding a tag name.
    pub template: String,
    pub priority: i32,
}

/// Client-facing analyzer registry row: what users can select and how the
/// selection translates to scanner arguments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientAnalyzer {
    pub analyzer: String,
    pub version: Option<String>,
    pub enabled: bool,
    /// Option name users pass to enable this analyzer.
    pub cli_name: String,
    /// Token appended to the scanner's tool list.
    pub build_append: Option<String>,
    /// Extra scanner arguments this analyzer requires.
    pub build_append_args: Option<String>,
}

/// A preconfigured analyzer set, e.g. "python", "c", "aggressive c".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    /// Analyzer names supplied by the profile.
    pub analyzers: Vec<String>,
    /// Extra scanner arguments supplied by the profile.
    pub scanner_args: Option<String>,
}

/// One cached (environment, analyzer, version) observation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerVersionSnapshot {
    pub environment: String,
    pub analyzer: String,
    pub version: String,
    pub captured_at: DateTime<Utc>,
}
