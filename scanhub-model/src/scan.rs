//! Scan records and their lifecycle taxonomy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::ids::{JobId, MappingId, PackageId, ReleaseId, ResultId, ScanId};

/// What kind of submission produced a scan.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanType {
    /// Regular release-tool scan: target diffed against an explicit base.
    Regular,
    /// The "before" run a differential scan is diffed against. Spawned
    /// internally as a sub-job, never enabled in end-user history.
    Baseline,
    /// base.version != target.version.
    Rebase,
    /// First build of a package; nothing to diff against.
    NewPackage,
    /// Ad-hoc scan submitted by a user.
    User,
}

impl ScanType {
    /// Target scans are the ones a release tool tracks; baselines and user
    /// scans are not part of the per-package history chain.
    pub fn is_target(self) -> bool {
        matches!(self, Self::Regular | Self::Rebase | Self::NewPackage)
    }

    /// Only these types carry a `base` reference for differential loading.
    pub fn can_have_base(self) -> bool {
        matches!(self, Self::Regular | Self::Rebase)
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Regular => "REGULAR",
            Self::Baseline => "BASELINE",
            Self::Rebase => "REBASE",
            Self::NewPackage => "NEW_PACKAGE",
            Self::User => "USER",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ScanType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGULAR" => Ok(Self::Regular),
            "BASELINE" => Ok(Self::Baseline),
            "REBASE" => Ok(Self::Rebase),
            "NEW_PACKAGE" => Ok(Self::NewPackage),
            "USER" => Ok(Self::User),
            other => Err(ModelError::UnknownVariant {
                kind: "scan type",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle state of a scan. Transitions are owned exclusively by the
/// waiver state machine in `scanhub-core`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanState {
    /// First, default state.
    Init,
    /// Submitted, waiting for a worker.
    Queued,
    /// Target job is running.
    Scanning,
    /// The baseline sub-job is running.
    BaseScanning,
    /// Finished with defects awaiting an owner's attention.
    NeedsInspection,
    /// Every defect group was appropriately waived.
    Waived,
    /// No new defects discovered.
    Passed,
    /// Terminal state for baseline-only scans.
    Finished,
    /// Build or analyzer failure; needs admin attention.
    Failed,
    /// Superseded by a newer submission for the same package/release.
    Canceled,
    /// Was waived, but one of the waivers got invalidated.
    Disputed,
    /// At least one group is confirmed to contain a bug.
    BugConfirmed,
}

impl ScanState {
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::Init | Self::Queued | Self::Scanning | Self::BaseScanning
        )
    }

    pub fn is_finished(self) -> bool {
        !self.is_in_progress()
    }

    /// Finished without infrastructure failure; such a scan stays eligible
    /// as the enabled head of its package/release chain.
    pub fn finished_well(self) -> bool {
        matches!(
            self,
            Self::NeedsInspection
                | Self::Waived
                | Self::Passed
                | Self::Disputed
                | Self::BugConfirmed
        )
    }

    pub fn finished_badly(self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }

    /// Fully dispositioned: nothing left for a human to review.
    pub fn is_processed(self) -> bool {
        matches!(self, Self::Passed | Self::Waived)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Queued => "QUEUED",
            Self::Scanning => "SCANNING",
            Self::BaseScanning => "BASE_SCANNING",
            Self::NeedsInspection => "NEEDS_INSPECTION",
            Self::Waived => "WAIVED",
            Self::Passed => "PASSED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Disputed => "DISPUTED",
            Self::BugConfirmed => "BUG_CONFIRMED",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ScanState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INIT" => Ok(Self::Init),
            "QUEUED" => Ok(Self::Queued),
            "SCANNING" => Ok(Self::Scanning),
            "BASE_SCANNING" => Ok(Self::BaseScanning),
            "NEEDS_INSPECTION" => Ok(Self::NeedsInspection),
            "WAIVED" => Ok(Self::Waived),
            "PASSED" => Ok(Self::Passed),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            "DISPUTED" => Ok(Self::Disputed),
            "BUG_CONFIRMED" => Ok(Self::BugConfirmed),
            other => Err(ModelError::UnknownVariant {
                kind: "scan state",
                value: other.to_string(),
            }),
        }
    }
}

/// The logical unit of "analyze this NVR".
///
/// `parent`/`child` form a singly-linked chronological chain per
/// (package, release): `parent` points at the newer scan, `child` at the one
/// this submission superseded. Exactly one scan per chain is `enabled` at any
/// time. `base` points at the diff baseline and is only ever set for
/// diff-capable types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scan {
    pub id: ScanId,
    pub nvr: String,
    pub scan_type: ScanType,
    pub state: ScanState,
    pub base: Option<ScanId>,
    pub parent: Option<ScanId>,
    pub child: Option<ScanId>,
    pub package: PackageId,
    /// Release the build-system tag maps to; user scans may have none.
    pub release: Option<ReleaseId>,
    /// Build environment the scan runs in.
    pub environment: String,
    pub owner: String,
    pub enabled: bool,
    pub submitted_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

impl Scan {
    pub fn is_failed(&self) -> bool {
        self.state == ScanState::Failed
    }

    pub fn is_in_progress(&self) -> bool {
        self.state.is_in_progress()
    }

    pub fn is_baseline(&self) -> bool {
        self.scan_type == ScanType::Baseline
    }
}

impl fmt::Display for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.id, self.nvr, self.state)
    }
}

/// Binding between a scan, its dispatched job, and its loaded result.
/// Job and result attach as the scan progresses; each link is one-to-one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanBinding {
    pub scan: ScanId,
    pub job: Option<JobId>,
    pub result: Option<ResultId>,
}

impl ScanBinding {
    pub fn new(scan: ScanId) -> Self {
        Self {
            scan,
            job: None,
            result: None,
        }
    }

    pub fn with_job(scan: ScanId, job: JobId) -> Self {
        Self {
            scan,
            job: Some(job),
            result: None,
        }
    }
}

/// Synchronous outcome reported back to the release tool.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Ok,
    Error,
    /// Package is not eligible for scanning; a soft outcome, not an error.
    Ineligible,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Ineligible => "INELIGIBLE",
        };
        write!(f, "{name}")
    }
}

/// Correlation between a release-tool advisory and the latest scan run for
/// it. The release tool polls scan state through this mapping's id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EtMapping {
    pub id: MappingId,
    pub advisory_id: String,
    pub external_scan_id: String,
    pub latest_scan: Option<ScanId>,
    pub comment: String,
    pub state: RequestState,
}

impl EtMapping {
    pub fn new(advisory_id: String, external_scan_id: String) -> Self {
        Self {
            id: MappingId::new(),
            advisory_id,
            external_scan_id,
            latest_scan: None,
            comment: String::new(),
            state: RequestState::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_and_finished_sets_are_disjoint() {
        let all = [
            ScanState::Init,
            ScanState::Queued,
            ScanState::Scanning,
            ScanState::BaseScanning,
            ScanState::NeedsInspection,
            ScanState::Waived,
            ScanState::Passed,
            ScanState::Finished,
            ScanState::Failed,
            ScanState::Canceled,
            ScanState::Disputed,
            ScanState::BugConfirmed,
        ];
        for state in all {
            assert!(
                !(state.is_in_progress()
                    && (state.finished_well() || state.finished_badly())),
                "{state} is both in-progress and finished"
            );
        }
    }

    #[test]
    fn state_names_round_trip() {
        for state in [
            ScanState::BaseScanning,
            ScanState::NeedsInspection,
            ScanState::BugConfirmed,
        ] {
            assert_eq!(state.to_string().parse::<ScanState>().unwrap(), state);
        }
    }

    #[test]
    fn only_diff_capable_types_take_a_base() {
        assert!(ScanType::Regular.can_have_base());
        assert!(ScanType::Rebase.can_have_base());
        assert!(!ScanType::NewPackage.can_have_base());
        assert!(!ScanType::Baseline.can_have_base());
        assert!(!ScanType::User.can_have_base());
    }
}
