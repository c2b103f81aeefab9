//! Catalog credential resolution for encore-ingest
//!
//! Each credential is resolved with Database → ENV → TOML priority. A missing
//! credential is not an error at startup: the matching client is built
//! unconfigured and any import that needs it fails with a configuration error.

use encore_common::config::TomlConfig;
use encore_common::Result;
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use crate::clients::ClientCredentials;
use crate::db::settings;

pub const EVENT_CATALOG_API_KEY_ENV: &str = "ENCORE_EVENT_CATALOG_API_KEY";
pub const MUSIC_CATALOG_CLIENT_ID_ENV: &str = "ENCORE_MUSIC_CATALOG_CLIENT_ID";
pub const MUSIC_CATALOG_CLIENT_SECRET_ENV: &str = "ENCORE_MUSIC_CATALOG_CLIENT_SECRET";

/// Credentials for both catalogs, as resolved at startup
#[derive(Debug, Clone, Default)]
pub struct ResolvedCredentials {
    pub event_catalog_api_key: Option<String>,
    pub music_catalog: Option<ClientCredentials>,
}

/// Resolve every catalog credential
pub async fn resolve_credentials(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<ResolvedCredentials> {
    let catalogs = &toml_config.catalogs;

    let event_catalog_api_key = resolve_value(
        "Event catalog API key",
        settings::get_event_catalog_api_key(db).await?,
        std::env::var(EVENT_CATALOG_API_KEY_ENV).ok(),
        catalogs.event_catalog_api_key.clone(),
    );

    let client_id = resolve_value(
        "Music catalog client id",
        settings::get_music_catalog_client_id(db).await?,
        std::env::var(MUSIC_CATALOG_CLIENT_ID_ENV).ok(),
        catalogs.music_catalog_client_id.clone(),
    );
    let client_secret = resolve_value(
        "Music catalog client secret",
        settings::get_music_catalog_client_secret(db).await?,
        std::env::var(MUSIC_CATALOG_CLIENT_SECRET_ENV).ok(),
        catalogs.music_catalog_client_secret.clone(),
    );

    let music_catalog = match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) => Some(ClientCredentials {
            client_id,
            client_secret,
        }),
        (None, None) => None,
        _ => {
            warn!("Music catalog needs both a client id and a client secret; catalog imports disabled");
            None
        }
    };

    if event_catalog_api_key.is_none() {
        warn!(
            "Event catalog API key not configured (settings table, {} or [catalogs] in TOML); show imports will fail",
            EVENT_CATALOG_API_KEY_ENV
        );
    }

    Ok(ResolvedCredentials {
        event_catalog_api_key,
        music_catalog,
    })
}

/// Pick the highest-priority valid value, warning when several sources set one
pub fn resolve_value(
    name: &str,
    db_value: Option<String>,
    env_value: Option<String>,
    toml_value: Option<String>,
) -> Option<String> {
    let candidates = [
        ("database", db_value),
        ("environment", env_value),
        ("TOML", toml_value),
    ];

    let valid: Vec<(&str, String)> = candidates
        .into_iter()
        .filter_map(|(source, value)| value.filter(|v| is_valid_key(v)).map(|v| (source, v)))
        .collect();

    if valid.len() > 1 {
        let sources: Vec<&str> = valid.iter().map(|(source, _)| *source).collect();
        warn!(
            "{} found in multiple sources: {}. Using {} (highest priority).",
            name,
            sources.join(", "),
            sources[0]
        );
    }

    valid.into_iter().next().map(|(source, value)| {
        info!("{} loaded from {}", name, source);
        value.trim().to_string()
    })
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
