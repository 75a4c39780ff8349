//! User configuration.
//!
//! Stored as JSON at `<config_dir>/porthog/config.json`; environment
//! variables override file values at load time.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::application::DEFAULT_CRITICAL_NAMES;
use crate::error::{Error, Result};

pub const ENV_FORMAT: &str = "PORTHOG_FORMAT";
pub const ENV_DENYLIST: &str = "PORTHOG_DENYLIST";
pub const ENV_CACHE_TTL: &str = "PORTHOG_CACHE_TTL";

/// How results are printed when no flag picks a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table on a terminal, plain text otherwise.
    #[default]
    Auto,
    Table,
    Json,
    Plain,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(OutputFormat::Auto),
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "plain" => Ok(OutputFormat::Plain),
            other => Err(Error::Config(format!("unknown output format '{}'", other))),
        }
    }
}

/// Configuration data stored in JSON format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Process names the kill command refuses without `--force-system`.
    #[serde(default = "default_denylist")]
    pub critical_process_denylist: Vec<String>,

    #[serde(default)]
    pub default_output_format: OutputFormat,

    /// Process identity cache lifetime in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Refresh interval of `watch` in seconds.
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,
}

fn default_denylist() -> Vec<String> {
    DEFAULT_CRITICAL_NAMES.iter().map(|s| s.to_string()).collect()
}

fn default_cache_ttl() -> u64 {
    5
}

fn default_watch_interval() -> u64 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            critical_process_denylist: default_denylist(),
            default_output_format: OutputFormat::default(),
            cache_ttl_secs: default_cache_ttl(),
            watch_interval_secs: default_watch_interval(),
        }
    }
}

impl Config {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs == 0 {
            return Err(Error::Config("cacheTtlSecs must be at least 1".to_string()));
        }
        if self.watch_interval_secs == 0 {
            return Err(Error::Config(
                "watchIntervalSecs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(format) = lookup(ENV_FORMAT) {
            self.default_output_format = format.parse()?;
        }
        if let Some(list) = lookup(ENV_DENYLIST) {
            self.critical_process_denylist = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(ttl) = lookup(ENV_CACHE_TTL) {
            self.cache_ttl_secs = ttl
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{}='{}': {}", ENV_CACHE_TTL, ttl, e)))?;
        }
        Ok(())
    }
}

/// Reads and writes the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store at the platform config directory, or `~/.porthog` without one.
    pub fn new() -> Result<Self> {
        let dir = match dirs::config_dir() {
            Some(dir) => dir.join("porthog"),
            None => dirs::home_dir()
                .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?
                .join(".porthog"),
        };
        Ok(Self {
            config_path: dir.join("config.json"),
        })
    }

    /// Create a config store with a custom path (for testing).
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Read the file without environment overrides. Missing file means defaults.
    pub async fn load_file(&self) -> Result<Config> {
        let content = match fs::read_to_string(&self.config_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.config_path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => return Err(Error::Config(format!("Failed to read config: {}", e))),
        };

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Effective configuration: file, then environment, then validation.
    pub async fn load(&self) -> Result<Config> {
        let mut config = self.load_file().await?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub async fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;

        if let Some(dir) = self.config_path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        // Write atomically by writing to temp file then renaming
        let temp_path = self.config_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to create temp config file: {}", e)))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| Error::Config(format!("Failed to sync config: {}", e)))?;

        fs::rename(&temp_path, &self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to rename config file: {}", e)))?;

        Ok(())
    }
}
