use std::sync::Arc;

use scanhub_core::catalog::Catalog;
use scanhub_core::external::TaskBroker;
use scanhub_core::persistence::ScanStore;
use scanhub_core::pipeline::ResultsPipeline;
use scanhub_core::scheduler::ScanScheduler;
use scanhub_core::versions::AnalyzerVersionCache;
use scanhub_core::waiving::WaiverStateMachine;

/// Shared service graph handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<ScanScheduler>,
    pub pipeline: Arc<ResultsPipeline>,
    pub lifecycle: Arc<WaiverStateMachine>,
    pub catalog: Arc<Catalog>,
    pub versions: AnalyzerVersionCache,
    pub broker: Arc<dyn TaskBroker>,
    pub scans: Arc<dyn ScanStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
