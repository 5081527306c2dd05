//! Configuration management for forwarding sessions.
//!
//! Stores configuration in JSON format at `~/.devforward/config.json`.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::adapters::DEFAULT_SEARCH_SPAN;
use crate::application::RetryPolicy;
use crate::domain::ForwardableEndpoint;
use crate::error::{Error, Result};

/// Label identifying the resources of one dev session.
pub const RUN_ID_LABEL: &str = "devforward.dev/run-id";

/// Configuration data stored in JSON format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Namespaces searched for labelled services, in order.
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,

    /// Label key carrying the session's run id.
    #[serde(default = "default_run_label")]
    pub run_label: String,

    /// Endpoints forwarded whether or not discovery finds them.
    #[serde(default)]
    pub port_forward: Vec<ForwardableEndpoint>,

    /// Discovery refresh interval in seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// How far above the preferred port the allocator searches.
    #[serde(default = "default_port_search_span")]
    pub port_search_span: u16,

    /// Local address tunnels listen on.
    #[serde(default = "default_address")]
    pub address: IpAddr,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_context: Option<String>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_namespaces() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_run_label() -> String {
    RUN_ID_LABEL.to_string()
}

fn default_refresh_interval() -> u64 {
    5
}

fn default_port_search_span() -> u16 {
    DEFAULT_SEARCH_SPAN
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespaces: default_namespaces(),
            run_label: default_run_label(),
            port_forward: Vec::new(),
            refresh_interval: default_refresh_interval(),
            port_search_span: default_port_search_span(),
            address: default_address(),
            kube_context: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Selector scoping discovery to the session `run_id`.
    pub fn run_selector(&self, run_id: &str) -> String {
        format!("{}={}", self.run_label, run_id)
    }

    /// Refresh interval, never shorter than one second.
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_interval.max(1))
    }
}

/// Configuration store for forwarding settings.
///
/// Handles reading and writing configuration to `~/.devforward/config.json`.
pub struct ConfigStore {
    /// Path to the configuration file.
    config_path: PathBuf,
}

impl ConfigStore {
    /// Create a new config store with the default path.
    ///
    /// Default path: `~/.devforward/config.json`
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

        let config_dir = home.join(".devforward");
        let config_path = config_dir.join("config.json");

        Ok(Self { config_path })
    }

    /// Create a config store with a custom path.
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from disk.
    ///
    /// Returns default config if the file doesn't exist.
    pub async fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            debug!(path = %self.config_path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub async fn save(&self, config: &Config) -> Result<()> {
        if let Some(config_dir) = self.config_path.parent() {
            if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
                fs::create_dir_all(config_dir).await.map_err(|e| {
                    Error::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
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

    // =========================================================================
    // User-requested endpoints
    // =========================================================================

    /// Add an endpoint that is forwarded on every session.
    pub async fn add_port_forward(&self, endpoint: ForwardableEndpoint) -> Result<()> {
        let mut config = self.load().await?;
        let key = endpoint.key();

        if config.port_forward.iter().any(|e| e.key() == key) {
            return Err(Error::Config(format!("{} is already configured", key)));
        }

        config.port_forward.push(endpoint);
        self.save(&config).await
    }

    /// Remove a configured endpoint by canonical key.
    pub async fn remove_port_forward(&self, key: &str) -> Result<ForwardableEndpoint> {
        let mut config = self.load().await?;
        let key = key.to_lowercase();

        let index = config
            .port_forward
            .iter()
            .position(|e| e.key() == key)
            .ok_or_else(|| Error::Config(format!("{} is not configured", key)))?;

        let removed = config.port_forward.remove(index);
        self.save(&config).await?;
        Ok(removed)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Set the namespaces searched by discovery.
    pub async fn set_namespaces(&self, namespaces: Vec<String>) -> Result<()> {
        if namespaces.is_empty() {
            return Err(Error::Config("At least one namespace is required".to_string()));
        }

        let mut config = self.load().await?;
        config.namespaces = namespaces;
        self.save(&config).await
    }
}
