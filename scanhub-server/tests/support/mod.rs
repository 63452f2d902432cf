//! Test application builder over the in-memory store and broker.

use std::sync::Arc;

use axum_test::TestServer;
use tempfile::TempDir;

use scanhub_config::{ResultsConfig, ScanningConfig};
use scanhub_core::baseline::BaseScanResolver;
use scanhub_core::catalog::Catalog;
use scanhub_core::external::{LogNotifier, PermissiveBuildSystem};
use scanhub_core::persistence::memory::{MemoryBroker, MemoryStore};
use scanhub_core::pipeline::ResultsPipeline;
use scanhub_core::pipeline::artifacts::{CsdiffRunner, FsResultArtifacts};
use scanhub_core::scheduler::ScanScheduler;
use scanhub_core::versions::AnalyzerVersionCache;
use scanhub_core::waiving::WaiverStateMachine;
use scanhub_model::{
    ClientAnalyzer, EnvironmentId, MockEnvironment, Profile, Release,
    ReleaseId, ReleaseMapping, Tag,
};
use scanhub_server::{AppState, create_api_router};

pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<MemoryStore>,
    pub broker: Arc<MemoryBroker>,
    _workdir: TempDir,
}

pub fn build_test_app() -> TestApp {
    let config = ScanningConfig::default();
    let workdir = tempfile::tempdir().expect("tempdir");

    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MemoryBroker::new());

    let release = ReleaseId::new();
    store.put_release(Release {
        id: release,
        tag: "rhel-9.2".into(),
        product: "Red Hat Enterprise Linux 9".into(),
        version: "9.2".into(),
        active: true,
        parent: None,
    });
    store.put_environment(MockEnvironment {
        id: EnvironmentId::new(),
        name: "rhel-9-x86_64".into(),
        enabled: true,
    });
    store.put_tag(Tag {
        name: "rhel-9.2-build".into(),
        environment: "rhel-9-x86_64".into(),
        release,
    });
    store.put_release_mapping(ReleaseMapping {
        release_pattern: r"^RHEL-(\d+)\.(\d+)".into(),
        template: "rhel-%s.%s-build".into(),
        priority: 1,
    });
    store.put_profile(Profile {
        name: "default".into(),
        description: None,
        enabled: true,
        analyzers: vec!["cppcheck".into()],
        scanner_args: None,
    });
    store.put_analyzer(ClientAnalyzer {
        analyzer: "cppcheck".into(),
        version: Some("2.9".into()),
        enabled: true,
        cli_name: "cppcheck".into(),
        build_append: Some("cppcheck".into()),
        build_append_args: None,
    });

    let artifacts = Arc::new(FsResultArtifacts::new(ResultsConfig {
        work_dir: workdir.path().to_path_buf(),
        exclude_dirs: Vec::new(),
    }));
    let catalog = Arc::new(Catalog::new(store.clone()));
    let versions = AnalyzerVersionCache::new(store.clone(), config.clone());
    let resolver = BaseScanResolver::new(
        store.clone(),
        store.clone(),
        versions.clone(),
        artifacts.clone(),
        config.clone(),
    );
    let lifecycle = WaiverStateMachine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        broker.clone(),
        Arc::new(LogNotifier),
    );
    let scheduler = ScanScheduler::new(
        store.clone(),
        catalog.clone(),
        versions.clone(),
        resolver,
        broker.clone(),
        Arc::new(PermissiveBuildSystem),
        lifecycle.clone(),
        config,
    );
    let pipeline = ResultsPipeline::new(
        store.clone(),
        store.clone(),
        store.clone(),
        catalog.clone(),
        versions.clone(),
        artifacts,
        Arc::new(CsdiffRunner),
        broker.clone(),
        lifecycle.clone(),
    );

    let state = AppState {
        scheduler: Arc::new(scheduler),
        pipeline: Arc::new(pipeline),
        lifecycle: Arc::new(lifecycle),
        catalog,
        versions,
        broker: broker.clone(),
        scans: store.clone(),
    };
    let server =
        TestServer::new(create_api_router(state)).expect("test server");

    TestApp {
        server,
        store,
        broker,
        _workdir: workdir,
    }
}
