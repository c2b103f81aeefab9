//! Settings database operations
//!
//! Key-value accessors over the `settings` table. Catalog credentials stored
//! here take priority over environment variables and the TOML file.

use encore_common::db::SETTING_MAX_LOCK_WAIT_MS;
use encore_common::{Error, Result};
use sqlx::{Pool, Sqlite};

pub const EVENT_CATALOG_API_KEY: &str = "event_catalog_api_key";
pub const MUSIC_CATALOG_CLIENT_ID: &str = "music_catalog_client_id";
pub const MUSIC_CATALOG_CLIENT_SECRET: &str = "music_catalog_client_secret";

/// Default lock wait when the setting is missing or unparsable
const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

pub async fn get_event_catalog_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, EVENT_CATALOG_API_KEY).await
}

pub async fn set_event_catalog_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, EVENT_CATALOG_API_KEY, key).await
}

pub async fn get_music_catalog_client_id(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, MUSIC_CATALOG_CLIENT_ID).await
}

pub async fn get_music_catalog_client_secret(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, MUSIC_CATALOG_CLIENT_SECRET).await
}

pub async fn set_music_catalog_credentials(
    db: &Pool<Sqlite>,
    client_id: String,
    client_secret: String,
) -> Result<()> {
    set_setting(db, MUSIC_CATALOG_CLIENT_ID, client_id).await?;
    set_setting(db, MUSIC_CATALOG_CLIENT_SECRET, client_secret).await
}

/// Maximum total wait when retrying a write on a locked database
pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> u64 {
    match get_setting::<u64>(db, SETTING_MAX_LOCK_WAIT_MS).await {
        Ok(Some(ms)) => ms,
        Ok(None) => DEFAULT_MAX_LOCK_WAIT_MS,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid {} setting, using default", SETTING_MAX_LOCK_WAIT_MS);
            DEFAULT_MAX_LOCK_WAIT_MS
        }
    }
}

/// Generic setting getter; empty values read as unset
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row.and_then(|(value,)| value) {
        Some(value) if !value.trim().is_empty() => {
            let parsed = value
                .trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
