//! Database and coordinator fixtures

use encore_common::config::PipelineSettings;
use encore_common::events::EventBus;
use encore_ingest::models::ImportJob;
use encore_ingest::services::{CatalogClients, ImportCoordinator, ProgressStream};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use super::catalogs::{FakeEventCatalog, FakeMusicCatalog, RecordingCacheInvalidator};

/// Create temporary test database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test_encore.db");
    let pool = encore_common::db::init_database(&db_path).await.unwrap();
    (temp_dir, pool)
}

/// Pipeline settings with no pauses and near-instant retries
pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        batch_concurrency: 2,
        batch_delay_ms: 0,
        max_attempts: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        ..PipelineSettings::default()
    }
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Poll until the job is terminal (panics after 10s)
pub async fn wait_for_terminal(coordinator: &ImportCoordinator, job_id: Uuid) -> ImportJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = coordinator.get_status(job_id).await.unwrap();
        if job.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} still {} after 10s",
            job_id,
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Coordinator wired to fake catalogs over a temp database
pub struct TestHarness {
    pub _dir: TempDir,
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub coordinator: ImportCoordinator,
    pub events: Arc<FakeEventCatalog>,
    pub music: Arc<FakeMusicCatalog>,
    pub cache: Arc<RecordingCacheInvalidator>,
}

impl TestHarness {
    pub async fn new(events: FakeEventCatalog, music: FakeMusicCatalog) -> Self {
        Self::with_settings(events, music, test_settings()).await
    }

    pub async fn with_settings(
        events: FakeEventCatalog,
        music: FakeMusicCatalog,
        settings: PipelineSettings,
    ) -> Self {
        let (dir, db) = create_test_db().await;
        let event_bus = EventBus::new(256);
        let events = Arc::new(events);
        let music = Arc::new(music);
        let cache = Arc::new(RecordingCacheInvalidator::default());

        let clients = CatalogClients {
            events: events.clone(),
            music: music.clone(),
            cache: cache.clone(),
        };
        let progress = ProgressStream::new(db.clone(), event_bus.clone())
            .with_poll_interval(Duration::from_millis(50));
        let coordinator = ImportCoordinator::new(db.clone(), event_bus.clone(), clients, settings)
            .with_progress_stream(progress);

        Self {
            _dir: dir,
            db,
            event_bus,
            coordinator,
            events,
            music,
            cache,
        }
    }
}
