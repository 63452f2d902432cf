//! Results, defect buckets, and individual findings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::ids::{DefectId, GroupId, ResultId};
use crate::report::ReportEvent;

/// Classification of a defect relative to the diff baseline.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefectKind {
    /// Newly introduced by the target build.
    New,
    /// Present in both base and target; nothing new.
    Old,
    /// Present in base, gone in target.
    Fixed,
    /// Default value before classification.
    Unknown,
    /// Matched a waiver recorded for an earlier run.
    PreviouslyWaived,
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::Old => "OLD",
            Self::Fixed => "FIXED",
            Self::Unknown => "UNKNOWN",
            Self::PreviouslyWaived => "PREVIOUSLY_WAIVED",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DefectKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "OLD" => Ok(Self::Old),
            "FIXED" => Ok(Self::Fixed),
            "UNKNOWN" => Ok(Self::Unknown),
            "PREVIOUSLY_WAIVED" => Ok(Self::PreviouslyWaived),
            other => Err(ModelError::UnknownVariant {
                kind: "defect kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Review state of one per-checker-group defect bucket.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupState {
    /// New defects awaiting review.
    NeedsInspection,
    /// Reviewed and waived.
    Waived,
    /// Only fixed defects; shown for information.
    Info,
    /// No defects in this group.
    Passed,
    /// Default state, changed during load.
    Unknown,
    /// Waived in one of the previous runs.
    PreviouslyWaived,
    /// Contains a confirmed bug that should be fixed.
    ContainsBug,
}

impl GroupState {
    /// Processed groups no longer need human attention.
    pub fn is_processed(self) -> bool {
        matches!(self, Self::Waived | Self::ContainsBug)
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NeedsInspection => "NEEDS_INSPECTION",
            Self::Waived => "WAIVED",
            Self::Info => "INFO",
            Self::Passed => "PASSED",
            Self::Unknown => "UNKNOWN",
            Self::PreviouslyWaived => "PREVIOUSLY_WAIVED",
            Self::ContainsBug => "CONTAINS_BUG",
        };
        write!(f, "{name}")
    }
}

impl FromStr for GroupState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEEDS_INSPECTION" => Ok(Self::NeedsInspection),
            "WAIVED" => Ok(Self::Waived),
            "INFO" => Ok(Self::Info),
            "PASSED" => Ok(Self::Passed),
            "UNKNOWN" => Ok(Self::Unknown),
            "PREVIOUSLY_WAIVED" => Ok(Self::PreviouslyWaived),
            "CONTAINS_BUG" => Ok(Self::ContainsBug),
            other => Err(ModelError::UnknownVariant {
                kind: "group state",
                value: other.to_string(),
            }),
        }
    }
}

/// One (analyzer name, version) pair actually used by a finished run.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AnalyzerVersionPair {
    pub name: String,
    pub version: String,
}

impl fmt::Display for AnalyzerVersionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// Outcome of one finished job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: ResultId,
    /// Lines of code scanned, when the scanner reports it.
    pub lines: Option<i64>,
    /// Seconds the scanner spent analyzing.
    pub scanning_time: Option<i64>,
    pub submitted_at: DateTime<Utc>,
    /// Analyzer versions actually used by the run.
    pub analyzers: Vec<AnalyzerVersionPair>,
}

/// A per-checker-group bucket of defects within one result. The unit of
/// waiving: users disposition groups, not individual defects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultGroup {
    pub id: GroupId,
    pub result: ResultId,
    pub checker_group: String,
    pub defect_kind: DefectKind,
    pub state: GroupState,
    pub defects_count: u32,
}

/// One finding: a checker hit with an ordered event trail, one of which is
/// the key event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Defect {
    pub id: DefectId,
    pub group: GroupId,
    pub checker: String,
    /// Stable position within the group's listing.
    pub order: Option<u32>,
    pub annotation: Option<String>,
    pub cwe: Option<i64>,
    pub key_event: usize,
    pub function: Option<String>,
    pub defect_identifier: Option<String>,
    pub state: DefectKind,
    pub events: Vec<ReportEvent>,
}

/// An individual static-analysis rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checker {
    pub name: String,
    /// Curated bucket of related rules; the unit of waiving.
    pub group: String,
}

/// Human-curated bucket of related checkers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerGroup {
    pub name: String,
    pub enabled: bool,
}
