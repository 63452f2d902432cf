//! Strongly typed surrogate ids.
//!
//! Every persisted record is keyed by a uuid-v7 newtype so that a scan id can
//! never be passed where a job id is expected. The self-referential chain
//! fields on [`crate::Scan`] (`base`, `parent`, `child`) hold these ids
//! rather than nested records.

use std::fmt;

use uuid::Uuid;

macro_rules! surrogate_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(transparent))]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn to_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

surrogate_id!(
    /// Identifier of one logical scan of an NVR.
    ScanId
);
surrogate_id!(
    /// Identifier of a job dispatched to the worker pool.
    JobId
);
surrogate_id!(
    /// Identifier of a loaded scan result.
    ResultId
);
surrogate_id!(
    /// Identifier of a per-checker-group defect bucket.
    GroupId
);
surrogate_id!(
    /// Identifier of a single defect finding.
    DefectId
);
surrogate_id!(
    /// Identifier of a waiver decision.
    WaiverId
);
surrogate_id!(
    /// Identifier of a package record.
    PackageId
);
surrogate_id!(
    /// Identifier of a system release.
    ReleaseId
);
surrogate_id!(
    /// Identifier of a build environment (mock config).
    EnvironmentId
);
surrogate_id!(
    /// Identifier of a release-tool correlation mapping.
    MappingId
);
