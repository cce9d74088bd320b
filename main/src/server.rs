use std::{sync::Arc, time::Duration};

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::{
        db::SurrealDbClient,
        job_store::{JobStore, SurrealJobStore},
        record_store::{RecordStore, SurrealRecordStore},
        store::{resolve_base_dir, StorageManager},
    },
    utils::config::{get_config, AppConfig, StorageKind},
};
use generation_pipeline::{run_retention_loop, GenerationPipeline, JobCoordinator};
use tower_http::services::ServeDir;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const RETENTION_SWEEP_EVERY: Duration = Duration::from_secs(60);

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Ensure db is initialized
    db.ensure_initialized().await?;

    let storage = StorageManager::new(&config).await?;
    let records: Arc<dyn RecordStore> = Arc::new(SurrealRecordStore::new(Arc::clone(&db)));
    let jobs: Arc<dyn JobStore> = Arc::new(SurrealJobStore::new(db));

    let pipeline = Arc::new(GenerationPipeline::new(records, &config, storage));
    let coordinator = Arc::new(JobCoordinator::new(jobs, pipeline));

    let interrupted = coordinator.fail_interrupted_jobs().await?;
    if interrupted > 0 {
        warn!(interrupted, "jobs from a previous run were left unfinished");
    }

    tokio::spawn(run_retention_loop(
        Arc::clone(&coordinator),
        Duration::from_secs(config.job_retention_secs),
        RETENTION_SWEEP_EVERY,
    ));

    let app = serve_assets(Router::new().nest("/api/v1", api_routes_v1()), &config)
        .with_state(ApiState::new(coordinator));

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Serves locally stored images under `public_asset_base_url` when that base is a path on this
/// server. Other bases point at an external host and mount nothing.
fn serve_assets<S>(router: Router<S>, config: &AppConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let mount = config.public_asset_base_url.trim_end_matches('/');
    if config.storage != StorageKind::Local || !mount.starts_with('/') {
        return router;
    }
    let base_dir = resolve_base_dir(config);
    info!(mount, dir = %base_dir.display(), "serving stored assets");
    router.nest_service(mount, ServeDir::new(base_dir))
}
