//! Shared data model for the scanhub workspace.
//!
//! Plain records and enums only: typed ids, NVR parsing, the scan/defect/
//! waiver state taxonomy, catalog reference data, and the raw JSON report
//! shapes produced by the analysis workers. No I/O lives here; the domain
//! services in `scanhub-core` operate on these types through repository
//! ports.

pub mod catalog;
pub mod defect;
pub mod error;
pub mod ids;
pub mod nvr;
pub mod report;
pub mod scan;
pub mod waiver;

pub use catalog::{
    AnalyzerVersionSnapshot, ClientAnalyzer, MockEnvironment, Package,
    PackageReleaseAttribute, Profile, Release, ReleaseMapping, Tag,
};
pub use defect::{
    AnalyzerVersionPair, Checker, CheckerGroup, Defect, DefectKind,
    GroupState, ResultGroup, ScanResult,
};
pub use error::{ModelError, Result};
pub use ids::{
    DefectId, EnvironmentId, GroupId, JobId, MappingId, PackageId, ReleaseId,
    ResultId, ScanId, WaiverId,
};
pub use nvr::Nvr;
pub use report::{ReportDefect, ReportEvent, ReportMetadata, ScanReport};
pub use scan::{
    EtMapping, RequestState, Scan, ScanBinding, ScanState, ScanType,
};
pub use waiver::{TrackerRef, Waiver, WaiverKind, WaiverLogAction, WaivingLog};
