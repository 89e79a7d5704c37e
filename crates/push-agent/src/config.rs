//! Agent configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`SIMPLEPUSH_URL`, `SIMPLEPUSH_STORE_DIR`)
//! - TOML configuration file
//! - `--config <path>` on the command line

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::client::ClientSettings;

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Client name, used in logs.
    #[serde(default = "default_name")]
    pub name: String,

    /// Push server URL.
    #[serde(default = "default_connect_url")]
    pub connect_url: String,

    /// Directory holding the persisted push store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Labels to subscribe one channel each at start-up.
    #[serde(default)]
    pub subscriptions: Vec<String>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus endpoint.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_name() -> String {
    "agPushNetwork".to_string()
}

fn default_connect_url() -> String {
    std::env::var("SIMPLEPUSH_URL")
        .unwrap_or_else(|_| "ws://localhost:7777/simplepush".to_string())
}

fn default_store_dir() -> PathBuf {
    std::env::var("SIMPLEPUSH_STORE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(shellexpand::tilde("~/.local/share/simplepush").as_ref())
        })
}

fn default_log_filter() -> String {
    "simplepush=info".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            connect_url: default_connect_url(),
            store_dir: default_store_dir(),
            subscriptions: Vec::new(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the default search paths or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "simplepush.toml",
            "/etc/simplepush/simplepush.toml",
            "~/.config/simplepush/simplepush.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.store_dir = PathBuf::from(
            shellexpand::tilde(&config.store_dir.to_string_lossy()).as_ref(),
        );

        Ok(config)
    }

    /// Settings for the push client.
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            name: self.name.clone(),
            connect_url: self.connect_url.clone(),
        }
    }
}
