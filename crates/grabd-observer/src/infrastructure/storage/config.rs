//! TOML configuration of the device observer.
//!
//! Read from `$GRABD_OBSERVER_CONFIG`, or `/etc/grabd/observer.toml` when the
//! variable is unset.  A missing file yields the defaults.
//!
//! ```toml
//! [observer]
//! log_level = "info"
//!
//! [channel]
//! socket_path = "/run/grabd/grabber.sock"
//! reconnect_interval_ms = 1000
//! server_check_interval_ms = 3000
//! ```

use std::path::{Path, PathBuf};

use grabd_ipc::ChannelSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "GRABD_OBSERVER_CONFIG";

/// Config file used when [`CONFIG_ENV_VAR`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/grabd/observer.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObserverConfig {
    #[serde(default)]
    pub observer: ObserverSettings,
    #[serde(default)]
    pub channel: ChannelSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObserverSettings {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Resolves the config file path from the environment.
pub fn config_file_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV_VAR)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Loads the config at `path`, returning the defaults if the file does not
/// exist.
pub fn load_config(path: &Path) -> Result<ObserverConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ObserverConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
