//! Infrastructure layer of the observer: the observation feed and the TOML
//! configuration file.

pub mod observation_feed;
pub mod storage;
