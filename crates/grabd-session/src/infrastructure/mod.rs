//! Infrastructure layer of the session agent: process spawning for grabber
//! requests, the session-state feed and the TOML configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and the
//! library crates, but MUST NOT be imported by the `application` layer.

pub mod actions;
pub mod session_feed;
pub mod storage;
