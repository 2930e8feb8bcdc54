//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/punchclock/config.toml)
//! 3. Environment variables (PUNCHCLOCK_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::SyncSettings;

/// Environment variable prefix
const ENV_PREFIX: &str = "PUNCHCLOCK";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local data (durable store, logs)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the remote sync API (e.g. https://api.example.com/v1)
    #[serde(default)]
    pub api_url: Option<String>,

    /// WebSocket URL of the push channel
    #[serde(default)]
    pub push_url: Option<String>,

    /// Bearer token for the API and push channel
    #[serde(default)]
    pub api_token: Option<String>,

    /// Fixed device identifier; generated and persisted when absent
    #[serde(default)]
    pub device_id: Option<String>,

    /// Log file path (defaults to stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Queue and sync tuning
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Tunables of the sync engine, as stored in the `[sync]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between queue drains
    pub drain_interval_secs: u64,
    /// Retry delay is `attempts * retry_base_delay_secs`
    pub retry_base_delay_secs: u64,
    /// Dispatch attempts before an operation is marked failed
    pub max_attempts: u32,
    /// A full sync older than this is due again
    pub freshness_window_secs: u64,
    /// Timeout of a single remote call
    pub request_timeout_secs: u64,
    /// Seconds between automatic full syncs while running
    pub auto_sync_interval_secs: u64,
    /// Seconds between cleanup passes while running
    pub cleanup_interval_secs: u64,
    /// Completed operations older than this are removed
    pub completed_retention_hours: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: 30,
            retry_base_delay_secs: 5,
            max_attempts: 3,
            freshness_window_secs: 300,
            request_timeout_secs: 15,
            auto_sync_interval_secs: 300,
            cleanup_interval_secs: 3600,
            completed_retention_hours: 24,
        }
    }
}

impl SyncConfig {
    /// Convert into the engine's runtime settings
    pub fn to_settings(&self) -> SyncSettings {
        SyncSettings {
            drain_interval: Duration::from_secs(self.drain_interval_secs.max(1)),
            retry_base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_attempts: self.max_attempts.max(1),
            freshness_window: Duration::from_secs(self.freshness_window_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            auto_sync_interval: Duration::from_secs(self.auto_sync_interval_secs.max(1)),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs.max(1)),
            completed_retention: Duration::from_secs(
                self.completed_retention_hours.saturating_mul(3600),
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_url: None,
            push_url: None,
            api_token: None,
            device_id: None,
            log_file: None,
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (PUNCHCLOCK_DATA_DIR, PUNCHCLOCK_API_URL, ...)
    /// 2. Config file (~/.config/punchclock/config.toml or PUNCHCLOCK_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Empty string clears optional values
        let optional = |name: &str| {
            std::env::var(format!("{}_{}", ENV_PREFIX, name))
                .ok()
                .map(|val| if val.is_empty() { None } else { Some(val) })
        };

        if let Some(val) = optional("API_URL") {
            self.api_url = val;
        }
        if let Some(val) = optional("PUSH_URL") {
            self.push_url = val;
        }
        if let Some(val) = optional("API_TOKEN") {
            self.api_token = val;
        }
        if let Some(val) = optional("DEVICE_ID") {
            self.device_id = val;
        }
        if let Some(val) = optional("LOG_FILE") {
            self.log_file = val.map(PathBuf::from);
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with PUNCHCLOCK_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("punchclock")
            .join("config.toml")
    }

    /// Get the directory of the durable key-value store
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    /// Health endpoint used as the reachability probe
    pub fn health_url(&self) -> Option<String> {
        self.api_url
            .as_ref()
            .map(|url| format!("{}/health", url.trim_end_matches('/')))
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("punchclock")
}
