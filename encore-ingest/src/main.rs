//! encore-ingest - Artist onboarding service
//!
//! Imports an artist's upcoming shows, venues and studio catalog from the
//! external event and music catalogs, reporting progress over SSE.

use anyhow::{Context, Result};
use encore_common::config::{config_file_path, database_path, load_toml_config, resolve_root_folder};
use encore_common::events::EventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use encore_ingest::clients::{
    CacheInvalidator, HttpCacheInvalidator, HttpEventCatalog, HttpMusicCatalog, NoopCacheInvalidator,
};
use encore_ingest::services::{spawn_periodic_sync, spawn_stale_job_sweep, CatalogClients, ImportCoordinator};
use encore_ingest::AppState;

const MODULE_NAME: &str = "encore-ingest";
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5731";
/// Broadcast buffer; lagging SSE subscribers catch up from the database
const EVENT_BUS_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Config is read before tracing so the TOML log level can apply
    let config_path = config_file_path(MODULE_NAME)?;
    let config = load_toml_config(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting {} v{} ({})",
        MODULE_NAME,
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );
    info!("Config: {}", config_path.display());

    let root_folder = resolve_root_folder(&config);
    let db_path = database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let db_pool = encore_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let credentials = encore_ingest::config::resolve_credentials(&db_pool, &config).await?;

    let cache: Arc<dyn CacheInvalidator> = match &config.cache_invalidation_url {
        Some(url) => {
            info!("Cache invalidation webhook: {}", url);
            Arc::new(HttpCacheInvalidator::new(url.clone())?)
        }
        None => {
            warn!("No cache_invalidation_url configured; cache invalidation disabled");
            Arc::new(NoopCacheInvalidator)
        }
    };

    let clients = CatalogClients {
        events: Arc::new(HttpEventCatalog::new(credentials.event_catalog_api_key)?),
        music: Arc::new(HttpMusicCatalog::new(credentials.music_catalog)?),
        cache,
    };

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let coordinator = ImportCoordinator::new(
        db_pool.clone(),
        event_bus.clone(),
        clients,
        config.pipeline.clone(),
    );

    let recovered = coordinator.recover_stale_jobs().await?;
    if recovered > 0 {
        info!("Resumed {} interrupted import job(s)", recovered);
    }

    let shutdown = CancellationToken::new();
    let stale_sweep = spawn_stale_job_sweep(
        coordinator.clone(),
        config.pipeline.lease_duration().max(Duration::from_secs(1)),
        shutdown.clone(),
    );
    let periodic_sync = config.pipeline.sync_interval_secs.map(|secs| {
        info!("Periodic bulk sync every {}s", secs);
        spawn_periodic_sync(
            coordinator.clone(),
            Duration::from_secs(secs.max(1)),
            config.pipeline.sync_batch_limit,
            shutdown.clone(),
        )
    });

    let state = AppState::new(db_pool, event_bus, coordinator);
    let app = encore_ingest::build_router(state);

    let bind_address = config
        .bind_address
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = stale_sweep.await;
    if let Some(handle) = periodic_sync {
        let _ = handle.await;
    }

    info!("{} stopped", MODULE_NAME);
    Ok(())
}
