//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debug adapter configurations
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Thread resolution settings
    #[serde(default)]
    pub threads: ThreadConfig,
}

/// Configuration for a debug adapter
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Path to the adapter executable
    pub path: PathBuf,

    /// Additional arguments to pass to the adapter
    #[serde(default)]
    pub args: Vec<String>,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Default adapter to use
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
        }
    }
}

fn default_adapter() -> String {
    "debugpy-adapter".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for a single DAP request
    #[serde(default = "default_dap_request")]
    pub dap_request_secs: u64,

    /// How long the CLI waits for a model notification before giving up
    #[serde(default = "default_event_wait")]
    pub event_wait_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dap_request_secs: default_dap_request(),
            event_wait_secs: default_event_wait(),
        }
    }
}

impl Timeouts {
    pub fn dap_request(&self) -> Duration {
        Duration::from_secs(self.dap_request_secs)
    }

    pub fn event_wait(&self) -> Duration {
        Duration::from_secs(self.event_wait_secs)
    }
}

fn default_dap_request() -> u64 {
    30
}
fn default_event_wait() -> u64 {
    10
}

/// Thread resolution settings
#[derive(Debug, Deserialize)]
pub struct ThreadConfig {
    /// Thread id used before the adapter has reported any thread
    #[serde(default = "default_sentinel_thread")]
    pub sentinel_thread_id: i64,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            sentinel_thread_id: default_sentinel_thread(),
        }
    }
}

fn default_sentinel_thread() -> i64 {
    1
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let config: Self =
            toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.timeouts.dap_request_secs == 0 {
            return Err(super::Error::Config(
                "timeouts.dap_request_secs must be at least 1".to_string(),
            ));
        }
        if let Some((name, _)) = self.adapters.iter().find(|(_, a)| a.path.as_os_str().is_empty()) {
            return Err(super::Error::Config(format!(
                "adapters.{} has an empty path",
                name
            )));
        }
        Ok(())
    }

    /// Get adapter configuration by name
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn get_adapter(&self, name: &str) -> Option<AdapterConfig> {
        if let Some(config) = self.adapters.get(name) {
            return Some(config.clone());
        }

        which::which(name).ok().map(|path| AdapterConfig {
            path,
            args: Vec::new(),
        })
    }
}
