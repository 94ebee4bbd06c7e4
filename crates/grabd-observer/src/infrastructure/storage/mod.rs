//! Storage infrastructure: the observer's configuration file.

pub mod config;
