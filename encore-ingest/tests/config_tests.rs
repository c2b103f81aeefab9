//! Credential resolution across database, environment and TOML

mod helpers;

use encore_common::config::TomlConfig;
use encore_ingest::config::{
    resolve_credentials, EVENT_CATALOG_API_KEY_ENV, MUSIC_CATALOG_CLIENT_ID_ENV,
    MUSIC_CATALOG_CLIENT_SECRET_ENV,
};
use encore_ingest::db::settings;
use helpers::*;
use serial_test::serial;

fn clear_env() {
    std::env::remove_var(EVENT_CATALOG_API_KEY_ENV);
    std::env::remove_var(MUSIC_CATALOG_CLIENT_ID_ENV);
    std::env::remove_var(MUSIC_CATALOG_CLIENT_SECRET_ENV);
}

fn toml_with_keys() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.catalogs.event_catalog_api_key = Some("toml-key".to_string());
    config.catalogs.music_catalog_client_id = Some("toml-id".to_string());
    config.catalogs.music_catalog_client_secret = Some("toml-secret".to_string());
    config
}

#[tokio::test]
#[serial]
async fn test_toml_used_when_nothing_else_set() {
    clear_env();
    let (_dir, pool) = create_test_db().await;

    let resolved = resolve_credentials(&pool, &toml_with_keys()).await.unwrap();

    assert_eq!(resolved.event_catalog_api_key.as_deref(), Some("toml-key"));
    let music = resolved.music_catalog.unwrap();
    assert_eq!(music.client_id, "toml-id");
    assert_eq!(music.client_secret, "toml-secret");
}

#[tokio::test]
#[serial]
async fn test_env_overrides_toml() {
    clear_env();
    std::env::set_var(EVENT_CATALOG_API_KEY_ENV, "env-key");
    let (_dir, pool) = create_test_db().await;

    let resolved = resolve_credentials(&pool, &toml_with_keys()).await.unwrap();
    clear_env();

    assert_eq!(resolved.event_catalog_api_key.as_deref(), Some("env-key"));
}

#[tokio::test]
#[serial]
async fn test_database_overrides_env() {
    clear_env();
    std::env::set_var(EVENT_CATALOG_API_KEY_ENV, "env-key");
    let (_dir, pool) = create_test_db().await;
    settings::set_event_catalog_api_key(&pool, "db-key".to_string())
        .await
        .unwrap();
    settings::set_music_catalog_credentials(&pool, "db-id".to_string(), "db-secret".to_string())
        .await
        .unwrap();

    let resolved = resolve_credentials(&pool, &toml_with_keys()).await.unwrap();
    clear_env();

    assert_eq!(resolved.event_catalog_api_key.as_deref(), Some("db-key"));
    assert_eq!(resolved.music_catalog.unwrap().client_id, "db-id");
}

#[tokio::test]
#[serial]
async fn test_half_configured_music_catalog_is_disabled() {
    clear_env();
    std::env::set_var(MUSIC_CATALOG_CLIENT_ID_ENV, "env-id");
    let (_dir, pool) = create_test_db().await;

    let resolved = resolve_credentials(&pool, &TomlConfig::default()).await.unwrap();
    clear_env();

    assert!(resolved.music_catalog.is_none());
    assert!(resolved.event_catalog_api_key.is_none());
}
