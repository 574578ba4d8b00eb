//! Main application configuration.

use config::ConfigError;
use docindex_core::RebuildConfig;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use super::{BIND_ENV, DEFAULT_BIND, DOCINDEX_CONFIG_PATH, ROOT_ENV};

/// The main application configuration, built from config file and environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory whose documents are indexed
    pub root: PathBuf,
    /// HTTP server bind address
    pub bind: String,
    /// File extensions to index, without the leading dot
    pub extensions: Vec<String>,
    /// Directory for the rolling log file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Pipeline and broadcaster tuning
    pub rebuild: RebuildConfig,
    /// Path to the config file this was loaded from
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            bind: DEFAULT_BIND.to_string(),
            extensions: vec!["md".to_string(), "txt".to_string()],
            log_dir: None,
            rebuild: RebuildConfig::default(),
            config_path: PathBuf::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(custom_config_path: Option<P>) -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path(custom_config_path);
        let mut config = Self::load_config_file(&config_path)?;
        config.config_path = config_path;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Get the config file path, using custom path or default.
    pub fn get_config_path<P: AsRef<Path>>(path: Option<P>) -> PathBuf {
        match path {
            Some(p) => p.as_ref().to_path_buf(),
            None => dirs::home_dir()
                .unwrap_or_default()
                .join(DOCINDEX_CONFIG_PATH),
        }
    }

    /// Load config file from disk. A missing file yields the defaults.
    pub(crate) fn load_config_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(config_path.as_ref()) {
            Ok(content) => toml::from_str::<AppConfig>(&content).map_err(|e| {
                ConfigError::Message(format!(
                    "Failed to parse config file {}: {}",
                    config_path.as_ref().display(),
                    e
                ))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Message(format!(
                "Failed to read config file: {}",
                e
            ))),
        }
    }

    /// Environment values win over whatever the file said.
    pub(crate) fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ROOT_ENV).filter(|value| !value.trim().is_empty()) {
            self.root = PathBuf::from(root);
        }
        if let Some(bind) = lookup(BIND_ENV).filter(|value| !value.trim().is_empty()) {
            self.bind = bind.trim().to_string();
        }
    }

    pub(crate) fn validate(&mut self) -> Result<(), ConfigError> {
        self.bind
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Message(format!("Invalid bind address {}: {}", self.bind, e)))?;

        self.extensions = self
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self.extensions.sort();
        self.extensions.dedup();
        if self.extensions.is_empty() {
            return Err(ConfigError::Message(
                "At least one file extension must be configured".to_string(),
            ));
        }

        if self.rebuild.progress_every == 0 {
            return Err(ConfigError::Message(
                "rebuild.progress_every must be at least 1".to_string(),
            ));
        }
        if self.rebuild.subscriber_capacity == 0 {
            return Err(ConfigError::Message(
                "rebuild.subscriber_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the resolved configuration as TOML.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {}", e))
    }
}
