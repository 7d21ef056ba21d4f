//! Layered daemon settings.
//!
//! Sources, later overriding earlier:
//! 1. Built-in defaults
//! 2. `config.toml` in the platform config dir (`vector-agent`)
//! 3. File given with `--config`
//! 4. `AGENT_*` environment variables, `__` separating nested keys
//!    (`AGENT_INDEX__DIMENSION=768`)
//! 5. CLI flags, applied by the caller

use std::path::PathBuf;

use agent_index::IndexConfig;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "vector-agent";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid index config: {0}")]
    Index(#[from] agent_index::IndexError),
}

/// Daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Grace period for the final commit and save on shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default)]
    pub index: IndexConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            index: IndexConfig::default(),
        }
    }
}

/// Directory holding the default `config.toml`.
pub fn config_dir() -> PathBuf {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default snapshot base directory.
pub fn default_index_path() -> PathBuf {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join("index"))
        .unwrap_or_else(|| PathBuf::from("./index"))
}

impl Settings {
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SettingsError> {
        let default_config_path = config_dir().join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())?
            .set_default("shutdown_timeout_ms", default_shutdown_timeout_ms() as i64)?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("AGENT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.expand_index_path();
        Ok(settings)
    }

    /// Expand `~` and environment variables in the index path.
    pub fn expand_index_path(&mut self) {
        if let Some(path) = &self.index.index_path {
            let raw = path.to_string_lossy();
            let expanded = shellexpand::full(&raw)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            self.index.index_path = Some(PathBuf::from(expanded));
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        Ok(self.index.validate()?)
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.shutdown_timeout_ms)
    }
}
