//! # grabd-ipc
//!
//! Same-host datagram channels shared by all three grabd processes.
//!
//! - **`transport`** – the channel interface ([`Transport`]) and its
//!   Unix-domain implementations.
//! - **`lifecycle`** – the liveness/reconnect state machine that drives a
//!   transport and reports `connected`, `connect_failed`, `closed` and
//!   received datagrams to its owner's mailbox.
//! - **`paths`** – socket locations, stale-file removal and ownership.
//! - **`settings`** – the `[channel]` section every process's config file
//!   shares.

pub mod lifecycle;
pub mod paths;
pub mod settings;
pub mod transport;

pub use lifecycle::{
    ChannelEvent, ChannelHandle, ChannelId, LifecycleEvent, LifecycleState, ReconnectPolicy,
};
pub use settings::ChannelSettings;
pub use transport::{
    ChannelError, Datagram, Transport, UnixClientTransport, UnixServerTransport,
    DEFAULT_BUFFER_SIZE,
};
