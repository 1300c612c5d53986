//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/segment/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/segment/` (~/.config/segment/)
//! - Data: `$XDG_DATA_HOME/segment/` (~/.local/share/segment/)
//! - State/Logs: `$XDG_STATE_HOME/segment/` (~/.local/state/segment/)

use crate::error::{Error, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Default collection endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.segment.io";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Client and delivery settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Client configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Project write key, used as the Basic auth user name
    pub write_key: Option<String>,

    /// Collection endpoint; batches go to `{base_url}/v1/batch`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Flush once this many messages are queued
    #[serde(default = "default_flush_at")]
    pub flush_at: usize,

    /// Seconds between automatic flushes (0 disables the timer)
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for transient upload failures
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            write_key: None,
            base_url: default_base_url(),
            flush_at: default_flush_at(),
            flush_interval_secs: default_flush_interval(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl ClientConfig {
    /// Config for `write_key` with every other setting at its default
    pub fn with_write_key(write_key: impl Into<String>) -> Self {
        Self {
            write_key: Some(write_key.into()),
            ..Default::default()
        }
    }

    /// The write key, or a config error if it is missing or blank
    pub fn write_key(&self) -> Result<&str> {
        match self.write_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(Error::Config("client.write_key is required".to_string())),
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        self.write_key()?;

        if self.flush_at == 0 {
            return Err(Error::Config(
                "client.flush_at must be at least 1".to_string(),
            ));
        }

        let url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            Error::Config(format!("client.base_url {:?} is invalid: {}", self.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "client.base_url must be http or https, got {:?}",
                url.scheme()
            )));
        }

        Ok(())
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_flush_at() -> usize {
    20
}

fn default_flush_interval() -> u64 {
    30
}

fn default_timeout() -> u64 {
    15
}

fn default_max_retries() -> usize {
    3
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/segment/config.toml` (~/.config/segment/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("segment").join("config.toml")
    }

    /// Returns the data directory path (for queue databases)
    ///
    /// `$XDG_DATA_HOME/segment/` (~/.local/share/segment/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("segment")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/segment/` (~/.local/state/segment/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("segment")
    }

    /// Returns the queue database path for a project
    ///
    /// Each write key gets its own file, named by the SHA-256 digest of the
    /// key so the key itself never lands on disk:
    /// `$XDG_DATA_HOME/segment/<digest>.db`
    pub fn queue_database_path(write_key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(write_key.as_bytes()));
        Self::data_dir().join(format!("{}.db", digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.client.write_key.is_none());
        assert_eq!(config.client.base_url, "https://api.segment.io");
        assert_eq!(config.client.flush_at, 20);
        assert_eq!(config.client.flush_interval_secs, 30);
        assert_eq!(config.client.timeout_secs, 15);
        assert_eq!(config.client.max_retries, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[client]
write_key = "abc123"
base_url = "http://localhost:8080"
flush_at = 5

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.client.write_key.as_deref(), Some("abc123"));
        assert_eq!(config.client.base_url, "http://localhost:8080");
        assert_eq!(config.client.flush_at, 5);
        assert_eq!(config.client.flush_interval_secs, 30);
        assert_eq!(config.logging.level, "debug");
        assert!(config.client.validate().is_ok());
    }

    #[test]
    fn test_client_config_validation() {
        // Missing write key
        assert!(ClientConfig::default().validate().is_err());

        // Blank write key
        assert!(ClientConfig::with_write_key("  ").validate().is_err());

        let config = ClientConfig {
            flush_at: 0,
            ..ClientConfig::with_write_key("key")
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            base_url: "not a url".to_string(),
            ..ClientConfig::with_write_key("key")
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            base_url: "ftp://api.segment.io".to_string(),
            ..ClientConfig::with_write_key("key")
        };
        assert!(config.validate().is_err());

        assert!(ClientConfig::with_write_key("key").validate().is_ok());
    }

    #[test]
    fn test_queue_database_path_is_per_write_key() {
        let a = Config::queue_database_path("key-a");
        let b = Config::queue_database_path("key-b");
        assert_ne!(a, b);
        assert_eq!(a, Config::queue_database_path("key-a"));

        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".db"));
        assert!(!name.contains("key-a"));
        assert_eq!(name.len(), 64 + 3);
    }
}
