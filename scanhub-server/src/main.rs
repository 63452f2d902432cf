//! scanhub server binary: config load, database wiring, and the axum
//! listener.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::info;

use scanhub_config::load_config;
use scanhub_core::baseline::BaseScanResolver;
use scanhub_core::catalog::Catalog;
use scanhub_core::external::{LogNotifier, PermissiveBuildSystem};
use scanhub_core::persistence::postgres::{
    PostgresCatalogStore, PostgresResultStore, PostgresScanStore,
    PostgresTaskBroker, PostgresVersionStore, PostgresWaiverStore,
};
use scanhub_core::pipeline::ResultsPipeline;
use scanhub_core::pipeline::artifacts::{CsdiffRunner, FsResultArtifacts};
use scanhub_core::scheduler::ScanScheduler;
use scanhub_core::versions::AnalyzerVersionCache;
use scanhub_core::waiving::WaiverStateMachine;
use scanhub_server::{AppState, create_api_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = std::env::var_os("SCANHUB_CONFIG").map(PathBuf::from);
    let config = load_config(config_path.as_deref())
        .context("failed to load configuration")?;

    let database_url = config
        .database
        .url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .context("no database URL configured")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections.unwrap_or(16))
        .connect(&database_url)
        .await
        .context("failed to connect to the database")?;
    sqlx::migrate!("../scanhub-core/migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let scans = Arc::new(PostgresScanStore::new(pool.clone()));
    let results = Arc::new(PostgresResultStore::new(pool.clone()));
    let waivers = Arc::new(PostgresWaiverStore::new(pool.clone()));
    let catalog_store = Arc::new(PostgresCatalogStore::new(pool.clone()));
    let versions_store = Arc::new(PostgresVersionStore::new(pool.clone()));
    let broker = Arc::new(PostgresTaskBroker::new(pool.clone()));
    let artifacts =
        Arc::new(FsResultArtifacts::new(config.results.clone()));
    let differ = Arc::new(CsdiffRunner);
    let build_system = Arc::new(PermissiveBuildSystem);
    let notifier = Arc::new(LogNotifier);

    let catalog = Arc::new(Catalog::new(catalog_store));
    let versions = AnalyzerVersionCache::new(
        versions_store,
        config.scanning.clone(),
    );
    let resolver = BaseScanResolver::new(
        scans.clone(),
        results.clone(),
        versions.clone(),
        artifacts.clone(),
        config.scanning.clone(),
    );
    let lifecycle = WaiverStateMachine::new(
        scans.clone(),
        results.clone(),
        waivers.clone(),
        broker.clone(),
        notifier,
    );
    let scheduler = ScanScheduler::new(
        scans.clone(),
        catalog.clone(),
        versions.clone(),
        resolver,
        broker.clone(),
        build_system,
        lifecycle.clone(),
        config.scanning.clone(),
    );
    let pipeline = ResultsPipeline::new(
        scans.clone(),
        results,
        waivers,
        catalog.clone(),
        versions.clone(),
        artifacts,
        differ,
        broker.clone(),
        lifecycle.clone(),
    );

    let state = AppState {
        scheduler: Arc::new(scheduler),
        pipeline: Arc::new(pipeline),
        lifecycle: Arc::new(lifecycle),
        catalog,
        versions,
        broker,
        scans,
    };
    let router = create_api_router(state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("scanhub listening on {addr}");
    axum::serve(listener, router).await?;
    Ok(())
}
