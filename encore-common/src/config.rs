//! Configuration loading and root folder resolution
//!
//! Configuration lives in a TOML file (default `~/.config/encore/<module>.toml`,
//! overridable with `ENCORE_CONFIG`). Every field is optional; missing values
//! fall back to compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "ENCORE_CONFIG";
/// Environment variable overriding the root (data) folder
pub const ROOT_FOLDER_ENV: &str = "ENCORE_ROOT";
/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "encore.db";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Data folder holding the SQLite database
    pub root_folder: Option<PathBuf>,
    /// HTTP listen address (e.g. "127.0.0.1:5731")
    pub bind_address: Option<String>,
    pub logging: LoggingConfig,
    pub pipeline: PipelineSettings,
    pub catalogs: CatalogCredentials,
    /// Webhook receiving cache tag invalidations; none disables invalidation
    pub cache_invalidation_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing level when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Catalog API credentials (lowest-priority source, see encore-ingest config)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogCredentials {
    pub event_catalog_api_key: Option<String>,
    pub music_catalog_client_id: Option<String>,
    pub music_catalog_client_secret: Option<String>,
}

/// Import pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Concurrent external calls per batch
    pub batch_concurrency: usize,
    /// Pause between batches (ms)
    pub batch_delay_ms: u64,
    /// Attempts per external call, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Tracks with liveness strictly above this are treated as live recordings
    pub liveness_threshold: f64,
    /// How far ahead to import upcoming shows
    pub event_window_days: i64,
    /// Upper bound on a single background phase
    pub max_phase_duration_secs: u64,
    /// Job execution lease length; renewed at every phase boundary
    pub lease_secs: u64,
    /// Period of the scheduled bulk refresh; none disables it
    pub sync_interval_secs: Option<u64>,
    /// Artists refreshed per scheduled run
    pub sync_batch_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_concurrency: 3,
            batch_delay_ms: 1500,
            max_attempts: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            liveness_threshold: 0.8,
            event_window_days: 365,
            max_phase_duration_secs: 600,
            lease_secs: 120,
            sync_interval_secs: None,
            sync_batch_limit: 25,
        }
    }
}

impl PipelineSettings {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn max_phase_duration(&self) -> Duration {
        Duration::from_secs(self.max_phase_duration_secs)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Reject settings that would stall or disable the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.batch_concurrency == 0 {
            return Err(Error::Config("pipeline.batch_concurrency must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("pipeline.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.liveness_threshold) {
            return Err(Error::Config(format!(
                "pipeline.liveness_threshold must be within 0.0..=1.0 (got {})",
                self.liveness_threshold
            )));
        }
        if self.max_phase_duration_secs == 0 || self.lease_secs == 0 {
            return Err(Error::Config(
                "pipeline.max_phase_duration_secs and pipeline.lease_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Locate the config file for a module
///
/// Priority: `ENCORE_CONFIG` → `<config_dir>/encore/<module>.toml`.
pub fn config_file_path(module_name: &str) -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    dirs::config_dir()
        .map(|d| d.join("encore").join(format!("{}.toml", module_name)))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Load TOML config from `path`; a missing file yields defaults
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!("Config file not found, using defaults: {}", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.pipeline.validate()?;

    Ok(config)
}

/// Root folder resolution, in priority order:
/// 1. `ENCORE_ROOT` environment variable
/// 2. TOML `root_folder`
/// 3. OS-dependent default
pub fn resolve_root_folder(config: &TomlConfig) -> PathBuf {
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Database path inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE_NAME)
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("encore"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/encore"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("encore"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/encore"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("encore"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\encore"))
    } else {
        PathBuf::from("./encore_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_toml_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.pipeline, PipelineSettings::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("encore-ingest.toml");
        std::fs::write(
            &path,
            r#"
bind_address = "0.0.0.0:9000"

[pipeline]
batch_concurrency = 5
liveness_threshold = 0.7

[catalogs]
event_catalog_api_key = "toml-key"
"#,
        )
        .unwrap();

        let config = load_toml_config(&path).unwrap();
        assert_eq!(config.bind_address.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(config.pipeline.batch_concurrency, 5);
        assert_eq!(config.pipeline.liveness_threshold, 0.7);
        assert_eq!(config.pipeline.max_attempts, 4);
        assert_eq!(config.catalogs.event_catalog_api_key.as_deref(), Some("toml-key"));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[pipeline]\nliveness_threshold = 1.5\n").unwrap();
        assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };

        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
        assert_eq!(resolve_root_folder(&config), PathBuf::from("/from/env"));

        std::env::remove_var(ROOT_FOLDER_ENV);
        assert_eq!(resolve_root_folder(&config), PathBuf::from("/from/toml"));

        let default = resolve_root_folder(&TomlConfig::default());
        assert!(default.ends_with("encore") || default.ends_with("encore_data"));
    }

    #[test]
    fn test_database_path() {
        assert_eq!(
            database_path(Path::new("/data/encore")),
            PathBuf::from("/data/encore/encore.db")
        );
    }
}
