//! Uploader configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux/macOS: `~/.config/bush/uploader.toml`
//! - Windows: `%APPDATA%/bush/uploader.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use bush_protocol::constants::{CONTROL_PLANE_TIMEOUT, PART_TRANSFER_TIMEOUT};
use bush_upload::EngineConfig;
use serde::{Deserialize, Serialize};

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Control-plane base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Bearer token for the control plane.
    #[serde(default)]
    pub api_token: String,

    /// Namespace used when `upload` is given none.
    #[serde(default)]
    pub namespace: String,

    /// Directory holding one JSON record per upload.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Bytes per chunk for new uploads.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Concurrent part transfers per upload.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Retries per part after its first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Control-plane request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Part transfer timeout in seconds.
    #[serde(default = "default_part_timeout")]
    pub part_timeout_secs: u64,

    /// Send a SHA-256 checksum header with every part.
    #[serde(default)]
    pub send_checksum: bool,
}

fn default_api_url() -> String {
    "http://localhost:8080/api".into()
}

fn default_state_dir() -> PathBuf {
    data_dir().join("uploads")
}

fn default_chunk_size() -> u64 {
    EngineConfig::default().chunk_size
}

fn default_max_parallel() -> usize {
    EngineConfig::default().max_parallel
}

fn default_max_retries() -> u32 {
    EngineConfig::default().max_retries
}

fn default_request_timeout() -> u64 {
    CONTROL_PLANE_TIMEOUT.as_secs()
}

fn default_part_timeout() -> u64 {
    PART_TRANSFER_TIMEOUT.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_token: String::new(),
            namespace: String::new(),
            state_dir: default_state_dir(),
            chunk_size: default_chunk_size(),
            max_parallel: default_max_parallel(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout(),
            part_timeout_secs: default_part_timeout(),
            send_checksum: false,
        }
    }
}

impl Config {
    /// Loads configuration from the default path, creating it if missing.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Loads configuration from `path`, creating it with defaults if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The file holds the API token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            chunk_size: self.chunk_size,
            max_parallel: self.max_parallel,
            max_retries: self.max_retries,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn part_timeout(&self) -> Duration {
        Duration::from_secs(self.part_timeout_secs)
    }

    /// Renders the configuration with the API token masked.
    pub fn redacted(&self) -> anyhow::Result<String> {
        let mut shown = self.clone();
        if !shown.api_token.is_empty() {
            shown.api_token = "********".into();
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("bush").join("uploader.toml")
}

fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        config_dir().join("bush")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".local").join("share").join("bush")
    }
}
