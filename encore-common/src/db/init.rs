//! Database initialization
//!
//! Creates the SQLite database on first run and the tables used by the
//! artist import pipeline. All statements are idempotent, so every service
//! start runs the full sequence.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Setting key: maximum total wait (ms) when retrying a write on a locked database
pub const SETTING_MAX_LOCK_WAIT_MS: &str = "max_lock_wait_ms";

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    // WAL allows concurrent readers (progress subscribers) with one writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_artists_table(pool).await?;
    create_venues_table(pool).await?;
    create_shows_table(pool).await?;
    create_songs_table(pool).await?;
    create_setlists_table(pool).await?;
    create_import_jobs_table(pool).await?;
    create_progress_events_table(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Artists: one row per performer, addressable by either catalog id
pub async fn create_artists_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artists (
            id TEXT PRIMARY KEY,
            event_catalog_id TEXT UNIQUE,
            music_catalog_id TEXT UNIQUE,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            image_url TEXT,
            genres TEXT NOT NULL DEFAULT '[]',
            popularity INTEGER,
            import_status TEXT NOT NULL DEFAULT 'pending',
            last_synced_at TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_venues_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS venues (
            id TEXT PRIMARY KEY,
            external_id TEXT UNIQUE,
            name TEXT NOT NULL,
            slug TEXT NOT NULL,
            city TEXT,
            region TEXT,
            country TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_venues_slug ON venues(slug)")
        .execute(pool)
        .await?;

    // One row per slug and city among venues the event catalog gave no id
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_venues_unlisted
        ON venues(slug, COALESCE(city, ''))
        WHERE external_id IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_shows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shows (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            artist_id TEXT NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
            venue_id TEXT REFERENCES venues(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            show_date TEXT NOT NULL,
            ticket_url TEXT,
            status TEXT NOT NULL DEFAULT 'upcoming',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_shows_artist ON shows(artist_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Songs: studio catalog, one row per (artist, recording identifier)
pub async fn create_songs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            id TEXT PRIMARY KEY,
            artist_id TEXT NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
            recording_id TEXT NOT NULL,
            external_track_id TEXT,
            title TEXT NOT NULL,
            album_name TEXT,
            popularity INTEGER NOT NULL DEFAULT 0,
            liveness REAL NOT NULL DEFAULT 0.0,
            release_date TEXT,
            duration_ms INTEGER,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(artist_id, recording_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Setlists: the voting artifact attached to a show
pub async fn create_setlists_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS setlists (
            id TEXT PRIMARY KEY,
            show_id TEXT NOT NULL UNIQUE REFERENCES shows(id) ON DELETE CASCADE,
            is_placeholder INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Import jobs
///
/// The partial unique index enforces at most one non-terminal job per
/// identity key.
pub async fn create_import_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_jobs (
            id TEXT PRIMARY KEY,
            identity_key TEXT NOT NULL,
            artist_id TEXT REFERENCES artists(id) ON DELETE SET NULL,
            status TEXT NOT NULL,
            current_phase TEXT NOT NULL,
            percentage REAL NOT NULL DEFAULT 0.0,
            shows_imported INTEGER NOT NULL DEFAULT 0,
            venues_imported INTEGER NOT NULL DEFAULT 0,
            songs_imported INTEGER NOT NULL DEFAULT 0,
            error_detail TEXT,
            phase_errors TEXT NOT NULL DEFAULT '[]',
            cursor TEXT,
            lease_owner TEXT,
            lease_expires_at INTEGER,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_import_jobs_active_identity
        ON import_jobs(identity_key)
        WHERE status NOT IN ('completed', 'failed', 'partial_failure')
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Progress events: append-only per-job log
pub async fn create_progress_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS progress_events (
            job_id TEXT NOT NULL REFERENCES import_jobs(id) ON DELETE CASCADE,
            sequence INTEGER NOT NULL,
            phase TEXT NOT NULL,
            status TEXT NOT NULL,
            percentage REAL NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (job_id, sequence)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize default settings
///
/// Existing values are never overwritten.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, SETTING_MAX_LOCK_WAIT_MS, "5000").await?;
    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // INSERT OR IGNORE handles concurrent initialization
    let result = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;

    if result.rows_affected() > 0 {
        info!("Initialized setting '{}' with default value: {}", key, default_value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn table_names(pool: &SqlitePool) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_init_creates_all_tables() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("nested").join("encore.db"))
            .await
            .unwrap();

        let tables = table_names(&pool).await;
        for expected in [
            "artists",
            "import_jobs",
            "progress_events",
            "setlists",
            "settings",
            "shows",
            "songs",
            "venues",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("encore.db");
        let pool = init_database(&path).await.unwrap();
        create_schema(&pool).await.unwrap();

        let wait: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(SETTING_MAX_LOCK_WAIT_MS)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(wait.as_deref(), Some("5000"));
    }

    #[tokio::test]
    async fn test_one_active_job_per_identity() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("encore.db")).await.unwrap();

        let insert = |id: &'static str, status: &'static str| {
            sqlx::query(
                "INSERT INTO import_jobs (id, identity_key, status, current_phase, started_at)
                 VALUES (?, 'event:K1', ?, 'bootstrap', '2026-01-01T00:00:00Z')",
            )
            .bind(id)
            .bind(status)
        };

        insert("a", "completed").execute(&pool).await.unwrap();
        insert("b", "bootstrapping").execute(&pool).await.unwrap();
        // Second active job for the same identity violates the partial index
        assert!(insert("c", "shows_importing").execute(&pool).await.is_err());
        // Terminal jobs are unconstrained
        insert("d", "failed").execute(&pool).await.unwrap();
    }
}
