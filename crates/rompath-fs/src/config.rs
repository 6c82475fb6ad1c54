//! Mount configuration: defaults, optional TOML file, CLI overrides.

use crate::engine::{EngineConfig, DEFAULT_VOLUME_LABEL};
use rompath_fetch::HttpFetcherConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MOUNT_POINT: &str = "roms";
pub const DEFAULT_CACHE_DIR: &str = "mamecache";
pub const DEFAULT_BASE_URL: &str = "https://mdk.cab/download/";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything needed to mount the filesystem.
///
/// ```toml
/// mount_point = "/mnt/roms"
/// cache_dir = "/var/cache/rompath"
/// base_url = "https://mdk.cab/download/"
/// enable_7z = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountConfig {
    pub mount_point: PathBuf,
    pub cache_dir: PathBuf,
    pub base_url: String,
    /// Serve `.7z` archives.
    pub enable_7z: bool,
    pub connect_timeout_secs: u64,
    pub volume_label: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from(DEFAULT_MOUNT_POINT),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            base_url: DEFAULT_BASE_URL.to_string(),
            enable_7z: false,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            volume_label: DEFAULT_VOLUME_LABEL.to_string(),
        }
    }
}

impl MountConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base_url must be an http(s) URL: {}",
                self.base_url
            )));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cache_dir is empty".to_string()));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(self.cache_dir.clone(), self.base_url.clone())
            .with_secondary(self.enable_7z)
            .with_volume_label(self.volume_label.clone())
    }

    pub fn fetcher_config(&self) -> HttpFetcherConfig {
        HttpFetcherConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..HttpFetcherConfig::default()
        }
    }
}
