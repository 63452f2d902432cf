//! Waiver decisions and their audit log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, WaiverId};

/// A user decision on a result group.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaiverKind {
    /// All defects in the group are false positives.
    NotABug,
    /// At least one defect is a real bug; fix and respin.
    IsABug,
    /// Real defects, to be fixed in a future release.
    FixLater,
    /// Just a comment, no waiving semantics.
    Comment,
}

impl WaiverKind {
    pub fn is_comment(self) -> bool {
        self == Self::Comment
    }

    /// Confirms the group contains a bug that blocks the build.
    pub fn is_bug(self) -> bool {
        self == Self::IsABug
    }

    /// Marks the group as containing a real defect, blocking or not.
    pub fn marks_bug(self) -> bool {
        matches!(self, Self::IsABug | Self::FixLater)
    }
}

impl fmt::Display for WaiverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotABug => "NOT_A_BUG",
            Self::IsABug => "IS_A_BUG",
            Self::FixLater => "FIX_LATER",
            Self::Comment => "COMMENT",
        };
        write!(f, "{name}")
    }
}

impl FromStr for WaiverKind {
    type Err = crate::error::ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_A_BUG" => Ok(Self::NotABug),
            "IS_A_BUG" => Ok(Self::IsABug),
            "FIX_LATER" => Ok(Self::FixLater),
            "COMMENT" => Ok(Self::Comment),
            other => Err(crate::error::ModelError::UnknownVariant {
                kind: "waiver kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Optional reference to an external bug tracker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "tracker", content = "key")]
pub enum TrackerRef {
    Bugzilla(String),
    Jira(String),
}

/// A recorded waiver. Soft-deleted rather than removed so the audit trail
/// survives invalidation; at most one waiver per group is active.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Waiver {
    pub id: WaiverId,
    pub group: GroupId,
    pub kind: WaiverKind,
    pub message: String,
    pub user: String,
    pub date: DateTime<Utc>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub tracker: Option<TrackerRef>,
}

impl Waiver {
    pub fn is_live(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

/// Action recorded in the append-only waiving log.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaiverLogAction {
    /// First waiver submitted for a group.
    New,
    /// Existing waiver invalidated.
    Delete,
    /// Another waiver submitted on top of a previous one.
    Rewaive,
}

/// Append-only audit record of waiving actions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WaivingLog {
    pub waiver: WaiverId,
    pub action: WaiverLogAction,
    pub user: String,
    pub date: DateTime<Utc>,
}
