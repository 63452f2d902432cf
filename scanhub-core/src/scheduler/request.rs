//! Typed submission requests.
//!
//! One explicit struct per submission path replaces the original option-bag
//! merging: required fields are required, optional fields are `Option`, and
//! every path shares the same validate → priority → persist → describe-job
//! pipeline in [`super::ScanScheduler`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is submitting. Elevated principals may set priorities above the
/// configured threshold.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    #[serde(default)]
    pub elevated: bool,
}

/// Exactly one source of the package build under scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionSource {
    /// Reference to an existing build in the build system.
    Build { nvr: String },
    /// A source archive uploaded out-of-band.
    Upload { upload_id: Uuid, filename: String },
    /// An upstream tarball plus the command that builds it.
    Tarball {
        upload_id: Uuid,
        filename: String,
        build_script: String,
    },
}

impl SubmissionSource {
    pub fn is_tarball(&self) -> bool {
        matches!(self, Self::Tarball { .. })
    }

    pub fn build_nvr(&self) -> Option<&str> {
        match self {
            Self::Build { nvr } => Some(nvr),
            _ => None,
        }
    }

    pub fn artifact_name(&self) -> Option<&str> {
        match self {
            Self::Build { .. } => None,
            Self::Upload { filename, .. } | Self::Tarball { filename, .. } => {
                Some(filename)
            }
        }
    }
}

/// Ad-hoc scan of a single artifact (`scan.mock_build` /
/// `scan.diff_build`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserScanSubmission {
    pub source: SubmissionSource,
    /// Environment name, or `auto` to resolve from the build's origin.
    pub environment: String,
    #[serde(default)]
    pub comment: String,
    /// Explicit analyzer selection (cli names).
    #[serde(default)]
    pub analyzers: Vec<String>,
    /// Named profile; the configured default applies when absent.
    #[serde(default)]
    pub profile: Option<String>,
    /// Client scanner-argument override; always wins over profile args.
    #[serde(default)]
    pub scanner_args: Option<String>,
    #[serde(default)]
    pub warning_level: Option<String>,
    /// Packages to install into the build root first.
    #[serde(default)]
    pub install_to_chroot: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub email_to: Option<String>,
    /// Analyze only the downstream patches instead of the whole build.
    #[serde(default)]
    pub diff_patches: bool,
}

/// Differential scan of two artifacts (`scan.create_user_diff_task`). The
/// baseline is exactly the client-supplied one; no reuse decision applies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserDiffSubmission {
    #[serde(flatten)]
    pub target: UserScanSubmission,
    pub base_source: SubmissionSource,
    /// Base environment; falls back to the target's.
    #[serde(default)]
    pub base_environment: Option<String>,
}

/// Base of a CI/release-tool submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseSpec {
    /// Diff against this NVR.
    Build(String),
    /// The literal "this is a new package" marker.
    NewPackage,
}

impl BaseSpec {
    /// Parse the release-tool convention: the literal `NEW_PACKAGE` marker
    /// (case-insensitive) means there is nothing to diff against.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("new_package") {
            Self::NewPackage
        } else {
            Self::Build(raw.to_string())
        }
    }
}

/// CI/release-tool submission (`errata.create_errata_diff_scan`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrataSubmission {
    /// Target NVR.
    pub target: String,
    /// Base NVR or the new-package marker.
    pub base: String,
    /// Raw release string, resolved through the release mappings.
    pub release: String,
    /// Package owner notified about the outcome.
    pub package_owner: String,
    /// Release-tool advisory the build belongs to.
    pub advisory_id: String,
    /// Release-tool internal id of the scan record.
    pub external_scan_id: String,
}

/// Synchronous response of the errata entry point; this shape is returned
/// even on internal error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrataResponse {
    pub status: scanhub_model::RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<scanhub_model::MappingId>,
}

/// Poll response for a release-tool mapping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrataScanState {
    pub status: scanhub_model::RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<scanhub_model::ScanState>,
}
