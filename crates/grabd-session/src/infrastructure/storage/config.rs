//! TOML configuration of the session agent.
//!
//! Read from `$GRABD_SESSION_CONFIG`, or `session.toml` in the user's config
//! directory (`$XDG_CONFIG_HOME/grabd` or `~/.config/grabd`).  A missing file
//! yields the defaults below.  The file is re-read on SIGHUP so preference
//! edits reach the grabber without a restart.
//!
//! ```toml
//! [session]
//! log_level = "info"
//! configuration_path = "/home/alice/.config/grabd/profile.json"
//!
//! [preferences]
//! use_fkeys_as_standard_function_keys = false
//! scroll_direction_is_natural = true
//! keyboard_type = 0
//! initial_key_repeat_milliseconds = 500
//! key_repeat_milliseconds = 83
//!
//! [channel]
//! socket_path = "/run/grabd/grabber.sock"
//! ```

use std::path::{Path, PathBuf};

use grabd_core::protocol::messages::SystemPreferences;
use grabd_ipc::ChannelSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "GRABD_SESSION_CONFIG";

const APP_DIR: &str = "grabd";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `XDG_CONFIG_HOME` nor `HOME` is set.
    #[error("could not determine the user config directory")]
    NoUserConfigDir,

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
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub preferences: SystemPreferences,
    #[serde(default)]
    pub channel: ChannelSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSettings {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Remapping configuration announced to the grabber.  Unset means
    /// `profile.json` in the user config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_path: Option<PathBuf>,
    /// This agent's endpoint.  Unset means the per-uid default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            configuration_path: None,
            endpoint_path: None,
        }
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

/// `$XDG_CONFIG_HOME/grabd` or `~/.config/grabd`.
pub fn user_config_dir() -> Result<PathBuf, ConfigError> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok_or(ConfigError::NoUserConfigDir)?;
    Ok(base.join(APP_DIR))
}

/// Resolves the config file path from the environment.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    match std::env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(user_config_dir()?.join("session.toml")),
    }
}

impl SessionConfig {
    /// The remapping configuration to announce.
    pub fn configuration_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.session.configuration_path {
            Some(path) => Ok(path.clone()),
            None => Ok(user_config_dir()?.join("profile.json")),
        }
    }
}

/// Loads the config at `path`, returning the defaults if the file does not
/// exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<SessionConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
