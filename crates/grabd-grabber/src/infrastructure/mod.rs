//! Infrastructure layer of the grabber.
//!
//! OS-facing adapters behind the arbitrator's traits: evdev device seizure
//! and enumeration, the process-liveness monitor, session links over Unix
//! datagram sockets, filesystem facts and the TOML configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and the
//! library crates, but MUST NOT be imported by the `application` layer.

pub mod devices;
pub mod host;
pub mod peer_links;
pub mod process_monitor;
pub mod storage;
