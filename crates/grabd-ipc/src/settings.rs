//! Channel settings as they appear in each process's TOML config file.
//!
//! ```toml
//! [channel]
//! socket_path = "/run/grabd/grabber.sock"
//! reconnect_interval_ms = 1000
//! server_check_interval_ms = 3000
//! buffer_size = 32768
//! ```
//!
//! An interval of `0` disables that timer.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::{ReconnectPolicy, DEFAULT_RECONNECT_INTERVAL, DEFAULT_SERVER_CHECK_INTERVAL};
use crate::paths::grabber_socket_path;
use crate::transport::DEFAULT_BUFFER_SIZE;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelSettings {
    /// The grabber's server socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_server_check_interval_ms")]
    pub server_check_interval_ms: u64,
    /// Largest datagram accepted, in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_socket_path() -> PathBuf {
    grabber_socket_path()
}
fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL.as_millis() as u64
}
fn default_server_check_interval_ms() -> u64 {
    DEFAULT_SERVER_CHECK_INTERVAL.as_millis() as u64
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            server_check_interval_ms: default_server_check_interval_ms(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl ChannelSettings {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            reconnect_interval: millis(self.reconnect_interval_ms),
            server_check_interval: millis(self.server_check_interval_ms),
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
