//! Storage infrastructure: the grabber's configuration file.

pub mod config;
