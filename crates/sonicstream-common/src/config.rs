//! Host configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors raised while loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Settings for the process hosting the offline worker.
///
/// The precache list and cache name are not configurable here; they ship
/// with the worker itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// URL the worker script is served from. Relative asset paths resolve
    /// against it and its directory is the worker scope.
    pub script_url: Url,

    /// Directory holding persisted cache stores. `None` keeps them in memory.
    pub storage_dir: Option<PathBuf>,

    /// User agent sent on network fetches
    pub user_agent: String,

    /// Per-request network timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            script_url: default_script_url(),
            storage_dir: dirs::cache_dir().map(|dir| dir.join("sonicstream").join("sw")),
            user_agent: format!("SonicStream-SW/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
        }
    }
}

impl HostConfig {
    /// Configuration with no on-disk storage.
    pub fn in_memory(script_url: Url) -> Self {
        Self {
            script_url,
            storage_dir: None,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Replace the script URL from a string.
    pub fn set_script_url(&mut self, url: &str) -> Result<(), ConfigError> {
        self.script_url = Url::parse(url)?;
        Ok(())
    }

    /// Network timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_script_url() -> Url {
    Url::parse("http://localhost:8000/sw.js").expect("static script URL is valid")
}
