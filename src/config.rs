//! Application configuration (SPEC_FULL §2 ambient stack): a TOML-backed
//! `AppConfig` loaded from `~/.config/ocpp-emulator/config.toml` or the
//! path named by `$OCPP_EMULATOR_CONFIG`, covering the environment/config
//! surface `spec.md` §6 names (database URI/name, collection names,
//! time-series enablement, connect timeout, max pool size, message buffer
//! size, batch insert interval, state-sync interval) plus CSMS connection
//! defaults for newly-created stations.
//!
//! Grounded in the teacher's `Config::load`/TOML-file convention
//! (`infrastructure/config/settings.rs`'s `load<P: AsRef<Path>>`), adapted
//! to this crate's flatter settings surface.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::StoreConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("malformed TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub uri: String,
    pub database_name: String,
    pub connect_timeout_secs: u64,
    pub max_pool_size: u32,
    pub time_series_enabled: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        let defaults = StoreConfig::default();
        Self {
            uri: defaults.uri,
            database_name: defaults.database_name,
            connect_timeout_secs: defaults.connect_timeout_secs,
            max_pool_size: defaults.max_pool_size,
            time_series_enabled: defaults.time_series_enabled,
        }
    }
}

impl From<&DatabaseSettings> for StoreConfig {
    fn from(settings: &DatabaseSettings) -> Self {
        Self {
            uri: settings.uri.clone(),
            database_name: settings.database_name.clone(),
            connect_timeout_secs: settings.connect_timeout_secs,
            max_pool_size: settings.max_pool_size,
            time_series_enabled: settings.time_series_enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Passed to `tracing_subscriber::EnvFilter::new` unless
    /// `RUST_LOG`/the crate's own env var is set.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Logging queue capacity (§4.7, default 1024).
    pub message_buffer_size: usize,
    /// Batch insert window in milliseconds (§4.7, default 1000 / up-to-100).
    pub batch_insert_interval_ms: u64,
    pub batch_max_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            message_buffer_size: 1024,
            batch_insert_interval_ms: 1000,
            batch_max_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Periodic `stateSync` interval (§4.6, default 30s).
    pub state_sync_interval_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            state_sync_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub api_host: String,
    pub api_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".to_string(),
            api_port: 9000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
    pub pipeline: PipelineSettings,
    pub runtime: RuntimeSettings,
    pub server: ServerSettings,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::from(&self.database)
    }

    pub fn state_sync_interval(&self) -> Duration {
        Duration::from_secs(self.runtime.state_sync_interval_secs)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.pipeline.batch_insert_interval_ms)
    }
}

/// `~/.config/ocpp-emulator/config.toml`, matching the teacher's
/// `default_config_path` convention.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-emulator")
        .join("config.toml")
}

pub fn config_path_from_env() -> PathBuf {
    std::env::var("OCPP_EMULATOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_store_config_defaults() {
        let app = AppConfig::default();
        let store = app.store_config();
        assert_eq!(store.uri, "mongodb://localhost:27017");
        assert_eq!(store.max_pool_size, 20);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_str = r#"
            [database]
            uri = "mongodb://example.internal:27017"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.uri, "mongodb://example.internal:27017");
        assert_eq!(config.database.database_name, "ocpp_emulator");
        assert_eq!(config.server.api_port, 9000);
    }
}
