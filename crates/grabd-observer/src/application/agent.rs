//! DeviceObserverAgent: the producer of grab-eligibility reports.
//!
//! The observer sees every input transition on every device without holding
//! any of them exclusively.  It keeps a [`GrabbabilityTracker`] and reports
//! to the grabber only when a device's verdict changes.
//!
//! The grabber clears its ledger whenever its socket is (re)bound, so on
//! every `connected` the agent re-announces itself and sends a fresh report
//! for every device it knows, each with a new sequence number.

use std::ops::ControlFlow;

use grabd_core::protocol::messages::{ConnectFrom, ConnectMessage};
use grabd_core::{encode_message, DeviceId, GrabbabilityTracker, GrabbableState, Message, ObservedInput};
use grabd_ipc::{ChannelEvent, LifecycleEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Something the device layer saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    Attached { device_id: DeviceId },
    Detached { device_id: DeviceId },
    Input(ObservedInput),
    CapsLock { on: bool },
}

/// Everything the agent reacts to.
#[derive(Debug)]
pub enum ObserverEvent {
    Channel(ChannelEvent),
    Observed(Observation),
    Shutdown,
}

impl From<ChannelEvent> for ObserverEvent {
    fn from(event: ChannelEvent) -> Self {
        ObserverEvent::Channel(event)
    }
}

impl From<Observation> for ObserverEvent {
    fn from(observation: Observation) -> Self {
        ObserverEvent::Observed(observation)
    }
}

/// The agent's channel to the grabber.
pub trait GrabberLink: Send {
    /// Queues a datagram; dropped while the channel is not connected.
    fn send(&self, payload: Vec<u8>);
}

impl GrabberLink for grabd_ipc::ChannelHandle {
    fn send(&self, payload: Vec<u8>) {
        grabd_ipc::ChannelHandle::send(self, payload);
    }
}

pub struct DeviceObserverAgent {
    pid: i32,
    tracker: GrabbabilityTracker,
    caps_lock: Option<bool>,
    connected: bool,
    link: Box<dyn GrabberLink>,
}

impl DeviceObserverAgent {
    pub fn new(pid: i32, link: Box<dyn GrabberLink>) -> Self {
        Self {
            pid,
            tracker: GrabbabilityTracker::new(),
            caps_lock: None,
            connected: false,
            link,
        }
    }

    pub fn tracker(&self) -> &GrabbabilityTracker {
        &self.tracker
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Processes events until [`ObserverEvent::Shutdown`] or until every
    /// sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<ObserverEvent>) {
        info!(pid = self.pid, "device observer started");
        while let Some(event) = events.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }
        info!("device observer stopped");
    }

    /// Handles one event.  Returns `Break` on shutdown.
    pub fn handle(&mut self, event: ObserverEvent) -> ControlFlow<()> {
        match event {
            ObserverEvent::Channel(ChannelEvent { event, .. }) => self.on_channel_event(event),
            ObserverEvent::Observed(observation) => self.on_observation(observation),
            ObserverEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn on_channel_event(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Connected => {
                info!("connected to grabber");
                self.connected = true;
                self.announce();
            }
            LifecycleEvent::ConnectFailed(e) => {
                debug!(error = %e, "grabber not reachable; will retry");
                self.connected = false;
            }
            LifecycleEvent::Closed => {
                if self.connected {
                    warn!("grabber channel closed; will reconnect");
                }
                self.connected = false;
            }
            LifecycleEvent::Received(datagram) => {
                debug!(bytes = datagram.payload.len(), "observer ignores inbound datagrams");
            }
        }
    }

    fn on_observation(&mut self, observation: Observation) {
        match observation {
            Observation::Attached { device_id } => {
                info!(%device_id, "device attached");
                let report = self.tracker.device_attached(device_id);
                self.report(report);
            }
            Observation::Detached { device_id } => {
                info!(%device_id, "device detached");
                self.tracker.device_detached(device_id);
            }
            Observation::Input(input) => {
                if let Some(report) = self.tracker.observe(input) {
                    self.report(report);
                }
            }
            Observation::CapsLock { on } => {
                if self.caps_lock != Some(on) {
                    self.caps_lock = Some(on);
                    self.send(&Message::CapsLockStateChanged(on));
                }
            }
        }
    }

    fn announce(&mut self) {
        self.send(&Message::Connect(ConnectMessage {
            pid: self.pid,
            connect_from: ConnectFrom::Observer,
        }));
        for report in self.tracker.snapshot() {
            self.send(&Message::GrabbableStateChanged(report));
        }
        if let Some(on) = self.caps_lock {
            self.send(&Message::CapsLockStateChanged(on));
        }
    }

    fn report(&self, state: GrabbableState) {
        debug!(device_id = %state.device_id, status = ?state.status, sequence = state.sequence, "grabbable state");
        self.send(&Message::GrabbableStateChanged(state));
    }

    fn send(&self, message: &Message) {
        if !self.connected {
            return;
        }
        match encode_message(message) {
            Ok(bytes) => self.link.send(bytes),
            Err(e) => warn!(operation = ?message.operation_type(), error = %e, "failed to encode"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grabd_core::{decode_message, GrabbableStatus, KeyCode, PointingButton, PressedKey, UngrabbableReason};
    use grabd_ipc::ChannelId;
    use std::sync::{Arc, Mutex};

    const KEYBOARD: DeviceId = DeviceId(1);
    const MOUSE: DeviceId = DeviceId(2);

    #[derive(Clone, Default)]
    struct RecordingLink {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RecordingLink {
        fn messages(&self) -> Vec<Message> {
            self.sent
                .lock()
                .expect("lock")
                .iter()
                .map(|bytes| decode_message(bytes).expect("decode"))
                .collect()
        }

        fn reports(&self) -> Vec<GrabbableState> {
            self.messages()
                .into_iter()
                .filter_map(|m| match m {
                    Message::GrabbableStateChanged(state) => Some(state),
                    _ => None,
                })
                .collect()
        }
    }

    impl GrabberLink for RecordingLink {
        fn send(&self, payload: Vec<u8>) {
            self.sent.lock().expect("lock").push(payload);
        }
    }

    fn connected_agent() -> (DeviceObserverAgent, RecordingLink) {
        let link = RecordingLink::default();
        let mut agent = DeviceObserverAgent::new(900, Box::new(link.clone()));
        agent.handle(channel(LifecycleEvent::Connected));
        (agent, link)
    }

    fn channel(event: LifecycleEvent) -> ObserverEvent {
        ObserverEvent::Channel(ChannelEvent {
            channel: ChannelId::new(),
            event,
        })
    }

    fn input(device_id: DeviceId, key: PressedKey, pressed: bool) -> ObserverEvent {
        Observation::Input(ObservedInput {
            device_id,
            key,
            pressed,
        })
        .into()
    }

    #[test]
    fn test_connected_announces_observer_role() {
        let (_, link) = connected_agent();

        assert_eq!(
            link.messages(),
            vec![Message::Connect(ConnectMessage {
                pid: 900,
                connect_from: ConnectFrom::Observer,
            })]
        );
    }

    #[test]
    fn test_held_key_makes_device_ungrabbable_until_released() {
        // Arrange
        let (mut agent, link) = connected_agent();
        agent.handle(Observation::Attached { device_id: KEYBOARD }.into());

        // Act
        agent.handle(input(KEYBOARD, PressedKey::Key(KeyCode::A), true));
        agent.handle(input(KEYBOARD, PressedKey::Key(KeyCode::A), false));

        // Assert
        let reports = link.reports();
        let statuses: Vec<_> = reports.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                GrabbableStatus::Grabbable,
                GrabbableStatus::Ungrabbable(UngrabbableReason::KeyRepeating),
                GrabbableStatus::Grabbable,
            ]
        );
        assert!(reports.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn test_reconnect_resends_every_device_with_newer_sequences() {
        // Arrange
        let (mut agent, link) = connected_agent();
        agent.handle(Observation::Attached { device_id: KEYBOARD }.into());
        agent.handle(Observation::Attached { device_id: MOUSE }.into());
        agent.handle(input(MOUSE, PressedKey::Button(PointingButton(1)), true));
        let before = link.reports();
        let last_sequence = before.iter().map(|r| r.sequence).max().expect("reports");

        // Act
        agent.handle(channel(LifecycleEvent::Closed));
        agent.handle(channel(LifecycleEvent::Connected));

        // Assert
        let resent: Vec<_> = link.reports().into_iter().skip(before.len()).collect();
        assert_eq!(resent.len(), 2);
        assert_eq!(resent[0].device_id, KEYBOARD);
        assert_eq!(resent[1].device_id, MOUSE);
        assert_eq!(
            resent[1].status,
            GrabbableStatus::Ungrabbable(UngrabbableReason::PointingButtonPressed)
        );
        assert!(resent.iter().all(|r| r.sequence > last_sequence));
    }

    #[test]
    fn test_reports_while_disconnected_are_not_sent() {
        // Arrange
        let link = RecordingLink::default();
        let mut agent = DeviceObserverAgent::new(900, Box::new(link.clone()));

        // Act
        agent.handle(Observation::Attached { device_id: KEYBOARD }.into());
        agent.handle(Observation::CapsLock { on: true }.into());

        // Assert
        assert!(link.messages().is_empty());
        assert_eq!(agent.tracker().status(KEYBOARD), Some(GrabbableStatus::Grabbable));
    }

    #[test]
    fn test_caps_lock_sent_on_change_and_replayed_on_connect() {
        // Arrange
        let (mut agent, link) = connected_agent();

        // Act
        agent.handle(Observation::CapsLock { on: true }.into());
        agent.handle(Observation::CapsLock { on: true }.into());
        agent.handle(channel(LifecycleEvent::Connected));

        // Assert
        let caps: Vec<_> = link
            .messages()
            .into_iter()
            .filter(|m| matches!(m, Message::CapsLockStateChanged(true)))
            .collect();
        assert_eq!(caps.len(), 2);
    }

    #[test]
    fn test_detached_device_is_not_resent() {
        let (mut agent, link) = connected_agent();
        agent.handle(Observation::Attached { device_id: KEYBOARD }.into());

        agent.handle(Observation::Detached { device_id: KEYBOARD }.into());
        agent.handle(channel(LifecycleEvent::Connected));

        assert_eq!(link.reports().len(), 1);
    }
}
