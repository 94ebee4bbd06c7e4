//! TOML configuration of the grabber.
//!
//! Read once at startup from `$GRABD_GRABBER_CONFIG`, or
//! `/etc/grabd/grabber.toml` when the variable is unset.  A missing file
//! yields the defaults below; a partial file fills the gaps with them.
//!
//! ```toml
//! [grabber]
//! log_level = "info"
//! console_user_id = 1000
//! system_configuration_path = "/etc/grabd/system.json"
//! process_poll_interval_ms = 500
//! device_scan_interval_ms = 1000
//!
//! [channel]
//! socket_path = "/run/grabd/grabber.sock"
//! reconnect_interval_ms = 1000
//! server_check_interval_ms = 3000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use grabd_ipc::ChannelSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "GRABD_GRABBER_CONFIG";

/// Config file used when [`CONFIG_ENV_VAR`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/grabd/grabber.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrabberConfig {
    #[serde(default)]
    pub grabber: GrabberSettings,
    #[serde(default)]
    pub channel: ChannelSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrabberSettings {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Owner given to the grabber socket once bound.  Unset keeps root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_user_id: Option<u32>,
    /// Remapping configuration applied while no session is connected.
    #[serde(default = "default_system_configuration_path")]
    pub system_configuration_path: PathBuf,
    /// Liveness polling period when pidfd is unavailable.
    #[serde(default = "default_process_poll_interval_ms")]
    pub process_poll_interval_ms: u64,
    #[serde(default = "default_device_scan_interval_ms")]
    pub device_scan_interval_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_system_configuration_path() -> PathBuf {
    PathBuf::from("/etc/grabd/system.json")
}
fn default_process_poll_interval_ms() -> u64 {
    500
}
fn default_device_scan_interval_ms() -> u64 {
    1000
}

impl Default for GrabberSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            console_user_id: None,
            system_configuration_path: default_system_configuration_path(),
            process_poll_interval_ms: default_process_poll_interval_ms(),
            device_scan_interval_ms: default_device_scan_interval_ms(),
        }
    }
}

impl GrabberSettings {
    pub fn process_poll_interval(&self) -> Duration {
        Duration::from_millis(self.process_poll_interval_ms.max(1))
    }

    pub fn device_scan_interval(&self) -> Duration {
        Duration::from_millis(self.device_scan_interval_ms.max(1))
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Resolves the config file path from the environment.
pub fn config_file_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV_VAR)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Loads the config at `path`, returning the defaults if the file does not
/// exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<GrabberConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GrabberConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Renders `config` as TOML, e.g. to seed a new config file.
///
/// # Errors
///
/// Returns [`ConfigError::Serialize`] if serialization fails.
pub fn render_config(config: &GrabberConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}
