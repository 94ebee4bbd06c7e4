//! Unix-domain datagram transports.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::net::UnixDatagram;
use tracing::debug;

use super::{ChannelError, Datagram, Transport};
use crate::paths::{remove_stale_socket, restrict_to_owner};

/// Server role: bound to a well-known path, receives from any local sender.
///
/// Liveness check: the path still exists and still names the socket this
/// transport bound (same inode).  Another process binding the same path, or
/// someone deleting it, counts as closed.
pub struct UnixServerTransport {
    path: PathBuf,
    owner: Option<u32>,
    socket: Option<UnixDatagram>,
    inode: Option<u64>,
    buffer: Vec<u8>,
}

impl UnixServerTransport {
    pub fn new(path: impl Into<PathBuf>, buffer_size: usize) -> Self {
        Self {
            path: path.into(),
            owner: None,
            socket: None,
            inode: None,
            buffer: vec![0; buffer_size],
        }
    }

    /// Hands the bound socket to `owner` (a uid) right after each bind.
    /// Without an owner the socket stays with the current user.
    pub fn with_owner(mut self, owner: Option<u32>) -> Self {
        self.owner = owner;
        self
    }

    fn bind_error(&self, source: std::io::Error) -> ChannelError {
        ChannelError::Bind {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl Transport for UnixServerTransport {
    async fn open(&mut self) -> Result<(), ChannelError> {
        self.close();
        if self.path.as_os_str().is_empty() {
            return Err(ChannelError::EmptyPath);
        }
        remove_stale_socket(&self.path).map_err(|e| self.bind_error(e))?;
        let socket = UnixDatagram::bind(&self.path).map_err(|e| self.bind_error(e))?;
        let metadata = restrict_to_owner(&self.path, self.owner)
            .and_then(|()| fs::metadata(&self.path));
        match metadata {
            Ok(metadata) => {
                self.inode = Some(metadata.ino());
                self.socket = Some(socket);
                Ok(())
            }
            Err(e) => {
                drop(socket);
                let _ = fs::remove_file(&self.path);
                Err(self.bind_error(e))
            }
        }
    }

    async fn check(&mut self) -> Result<(), ChannelError> {
        match fs::metadata(&self.path) {
            Err(_) => Err(ChannelError::SocketRemoved(self.path.clone())),
            Ok(metadata) if Some(metadata.ino()) != self.inode => {
                Err(ChannelError::SocketReplaced(self.path.clone()))
            }
            Ok(_) => Ok(()),
        }
    }

    async fn send(&mut self, _payload: &[u8]) -> Result<(), ChannelError> {
        Err(ChannelError::ServerCannotSend)
    }

    async fn recv(&mut self) -> Result<Datagram, ChannelError> {
        let socket = self.socket.as_ref().ok_or(ChannelError::NotOpen)?;
        let (len, addr) = socket
            .recv_from(&mut self.buffer)
            .await
            .map_err(ChannelError::Receive)?;
        Ok(Datagram {
            payload: self.buffer[..len].to_vec(),
            sender: addr.as_pathname().map(Path::to_path_buf),
        })
    }

    fn close(&mut self) {
        if self.socket.take().is_none() {
            return;
        }
        // Only unlink the file if it is still ours.
        let ours = fs::metadata(&self.path)
            .map(|m| Some(m.ino()) == self.inode)
            .unwrap_or(false);
        if ours {
            let _ = fs::remove_file(&self.path);
        }
        self.inode = None;
    }

    fn endpoint(&self) -> &Path {
        &self.path
    }
}

/// Client role: sends to one server path.
///
/// Without a local path the socket is unbound and `connect`ed to the server;
/// the peer cannot address replies to it.  With a local path the socket is
/// bound there (permission-restricted to the owner) and addresses the server
/// per datagram, so it also receives from anyone who sends to that path.
///
/// Liveness check: a zero-length datagram to the server.
pub struct UnixClientTransport {
    server_path: PathBuf,
    local_path: Option<PathBuf>,
    socket: Option<UnixDatagram>,
    buffer: Vec<u8>,
}

impl UnixClientTransport {
    pub fn new(server_path: impl Into<PathBuf>, buffer_size: usize) -> Self {
        Self {
            server_path: server_path.into(),
            local_path: None,
            socket: None,
            buffer: vec![0; buffer_size],
        }
    }

    /// Binds the client socket at `local_path` so the server can reply.
    pub fn with_local_path(mut self, local_path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(local_path.into());
        self
    }

    fn connect_error(&self, source: std::io::Error) -> ChannelError {
        ChannelError::Connect {
            path: self.server_path.clone(),
            source,
        }
    }

    async fn open_bound(&self, local: &Path) -> Result<UnixDatagram, ChannelError> {
        let bind_error = |source| ChannelError::Bind {
            path: local.to_path_buf(),
            source,
        };
        remove_stale_socket(local).map_err(bind_error)?;
        let socket = UnixDatagram::bind(local).map_err(bind_error)?;
        let announced = match restrict_to_owner(local, None) {
            Ok(()) => socket
                .send_to(&[], &self.server_path)
                .await
                .map(|_| ())
                .map_err(|e| self.connect_error(e)),
            Err(e) => Err(bind_error(e)),
        };
        if let Err(e) = announced {
            drop(socket);
            if let Err(remove) = fs::remove_file(local) {
                debug!(path = %local.display(), error = %remove, "could not remove client socket");
            }
            return Err(e);
        }
        Ok(socket)
    }
}

#[async_trait]
impl Transport for UnixClientTransport {
    async fn open(&mut self) -> Result<(), ChannelError> {
        self.close();
        if self.server_path.as_os_str().is_empty() {
            return Err(ChannelError::EmptyPath);
        }
        let socket = match self.local_path.clone() {
            Some(local) => self.open_bound(&local).await?,
            None => {
                let socket = UnixDatagram::unbound().map_err(|e| self.connect_error(e))?;
                socket
                    .connect(&self.server_path)
                    .map_err(|e| self.connect_error(e))?;
                socket
            }
        };
        self.socket = Some(socket);
        Ok(())
    }

    async fn check(&mut self) -> Result<(), ChannelError> {
        self.send(&[]).await
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let socket = self.socket.as_ref().ok_or(ChannelError::NotOpen)?;
        let result = match self.local_path {
            Some(_) => socket.send_to(payload, &self.server_path).await,
            None => socket.send(payload).await,
        };
        result.map(|_| ()).map_err(ChannelError::Send)
    }

    async fn recv(&mut self) -> Result<Datagram, ChannelError> {
        let socket = self.socket.as_ref().ok_or(ChannelError::NotOpen)?;
        let (len, sender) = match self.local_path {
            Some(_) => {
                let (len, addr) = socket
                    .recv_from(&mut self.buffer)
                    .await
                    .map_err(ChannelError::Receive)?;
                (len, addr.as_pathname().map(Path::to_path_buf))
            }
            None => {
                let len = socket
                    .recv(&mut self.buffer)
                    .await
                    .map_err(ChannelError::Receive)?;
                (len, Some(self.server_path.clone()))
            }
        };
        Ok(Datagram {
            payload: self.buffer[..len].to_vec(),
            sender,
        })
    }

    fn close(&mut self) {
        if self.socket.take().is_none() {
            return;
        }
        if let Some(local) = &self.local_path {
            if let Err(e) = fs::remove_file(local) {
                debug!(path = %local.display(), error = %e, "could not remove client socket");
            }
        }
    }

    fn endpoint(&self) -> &Path {
        &self.server_path
    }
}
