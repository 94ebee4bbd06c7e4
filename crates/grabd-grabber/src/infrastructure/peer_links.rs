//! Production [`PeerConnector`]: session links over Unix datagram sockets and
//! pid watches through [`ProcessMonitor`].
//!
//! A session link is an ordinary [`ChannelHandle`] in the client role whose
//! policy never reconnects: when it fails or closes, the arbitrator decides
//! what happens next.  Both the link and the monitor deliver into the
//! arbitrator's own mailbox.

use std::path::Path;
use std::time::Duration;

use grabd_ipc::{ChannelHandle, ChannelId, ReconnectPolicy, UnixClientTransport};
use tokio::sync::mpsc;

use super::process_monitor::ProcessMonitor;
use crate::application::arbitrator::{GrabberEvent, PeerConnector, PeerWatch, SessionLink};

pub struct UnixPeerConnector {
    events: mpsc::Sender<GrabberEvent>,
    policy: ReconnectPolicy,
    buffer_size: usize,
    poll_interval: Duration,
}

impl UnixPeerConnector {
    /// `policy` supplies the liveness check period; its reconnect interval is
    /// ignored.
    pub fn new(
        events: mpsc::Sender<GrabberEvent>,
        policy: ReconnectPolicy,
        buffer_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            events,
            policy: policy.without_reconnect(),
            buffer_size,
            poll_interval,
        }
    }
}

impl PeerConnector for UnixPeerConnector {
    fn open_session_link(&mut self, generation: ChannelId, endpoint: &Path) -> Box<dyn SessionLink> {
        let transport = UnixClientTransport::new(endpoint, self.buffer_size);
        Box::new(ChannelHandle::start(
            generation,
            transport,
            self.policy,
            self.events.clone(),
        ))
    }

    fn watch_process(&mut self, generation: ChannelId, pid: i32) -> Box<dyn PeerWatch> {
        Box::new(ProcessMonitor::start(
            pid,
            generation,
            self.poll_interval,
            self.events.clone(),
        ))
    }
}

impl SessionLink for ChannelHandle {
    fn send(&self, payload: Vec<u8>) {
        ChannelHandle::send(self, payload);
    }

    fn stop(&mut self) {
        ChannelHandle::stop(self);
    }
}
