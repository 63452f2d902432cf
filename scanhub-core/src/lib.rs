//! Core library for scanhub.
//!
//! Owns the decisions of the scan orchestration engine: request validation
//! and admission ([`scheduler`]), base-reuse ([`baseline`]) backed by the
//! analyzer version cache ([`versions`]), result reconciliation
//! ([`pipeline`]), and the scan/group lifecycle ([`waiving`]). Persistence
//! and the worker-pool substrate are consumed through ports
//! ([`persistence`], [`external`]); nothing in here polls or blocks on the
//! outside world.

pub mod baseline;
pub mod catalog;
pub mod error;
pub mod external;
pub mod persistence;
pub mod pipeline;
pub mod scheduler;
pub mod versions;
pub mod waiving;

pub use baseline::{BaseScanResolver, BaselineDecision};
pub use catalog::Catalog;
pub use error::{HubError, Result};
pub use external::{
    BuildInfo, BuildSystem, DefectDiffer, JobInfo, JobQuery, JobSpec,
    JobState, LogNotifier, ResultArtifacts, ScanNotifier, TaskBroker,
};
pub use pipeline::ResultsPipeline;
pub use scheduler::ScanScheduler;
pub use versions::AnalyzerVersionCache;
pub use waiving::WaiverStateMachine;
