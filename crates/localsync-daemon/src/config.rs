//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use localsync_core::SyncConfig;
use serde::{Deserialize, Serialize};

/// Main configuration for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Folders to keep in sync
    #[serde(default)]
    pub roots: Vec<RootConfig>,

    /// Glob patterns of names that are never tracked
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Skip names starting with a dot
    #[serde(default = "default_true")]
    pub skip_hidden: bool,

    /// Watcher debounce period in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How often the retry queues are processed, in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Sleep between loop iterations when nothing is happening, in milliseconds
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,

    /// Resolve names case-insensitively through the alias index
    #[serde(default)]
    pub case_fold_aliases: bool,

    /// Change detection tunables
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    pub path: PathBuf,
    /// Correlation tag reported with this sync
    #[serde(default)]
    pub tag: i64,
}

fn default_exclude() -> Vec<String> {
    vec!["*.tmp".to_string(), "~$*".to_string(), "*.crdownload".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_idle_ms() -> u64 {
    100
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            exclude: default_exclude(),
            skip_hidden: default_true(),
            debounce_ms: default_debounce_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            idle_ms: default_idle_ms(),
            case_fold_aliases: false,
            sync: SyncConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the config directory
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: DaemonConfig = serde_json::from_str(&content)
                .with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_file
            );
            let config = DaemonConfig::default();

            std::fs::create_dir_all(config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            Ok(config)
        }
    }

    /// Platform config directory, e.g. ~/.config/localsync on Linux
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("localsync")
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}
