//! Storage infrastructure: the session agent's configuration file.

pub mod config;
