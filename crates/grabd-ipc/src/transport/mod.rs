//! The local datagram channel interface.
//!
//! A [`Transport`] is one endpoint of a same-host datagram socket, either the
//! server role (bound to a path, receives from anyone) or the client role
//! (addresses one server).  It only does I/O.  Retry timing, liveness
//! scheduling and lifecycle events belong to
//! [`ChannelHandle`](crate::lifecycle::ChannelHandle), which drives a
//! transport from a single task.

pub mod unix;

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use unix::{UnixClientTransport, UnixServerTransport};

/// Default receive buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Errors raised by a transport.  None of them are fatal: the lifecycle turns
/// them into `connect_failed` or `closed` and retries.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The configured socket path is empty.
    #[error("socket path is empty")]
    EmptyPath,

    /// Binding the server (or the client's local) path failed.
    #[error("failed to bind {}: {source}", .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The peer could not be reached.
    #[error("failed to connect to {}: {source}", .path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The bound socket file disappeared.
    #[error("socket {} was removed", .0.display())]
    SocketRemoved(PathBuf),

    /// The bound socket file now belongs to a different bind.
    #[error("socket {} was replaced", .0.display())]
    SocketReplaced(PathBuf),

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    /// An operation was attempted before `open` succeeded.
    #[error("channel is not open")]
    NotOpen,

    /// Server endpoints only receive.
    #[error("server endpoints do not send")]
    ServerCannotSend,
}

/// One received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    /// Bound path of the sender, if it has one.  Unbound senders cannot be
    /// answered.
    pub sender: Option<PathBuf>,
}

/// One endpoint of a local datagram channel.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Binds (server role) or reaches the peer (client role).  Replaces any
    /// previously open socket.
    async fn open(&mut self) -> Result<(), ChannelError>;

    /// Verifies the endpoint is still usable.  An error means "closed".
    async fn check(&mut self) -> Result<(), ChannelError>;

    async fn send(&mut self, payload: &[u8]) -> Result<(), ChannelError>;

    /// Waits for the next datagram.  Must be cancel-safe.
    async fn recv(&mut self) -> Result<Datagram, ChannelError>;

    /// Drops the socket.  Idempotent.
    fn close(&mut self);

    /// Path used in log fields.
    fn endpoint(&self) -> &Path;
}
