//! ConnectionArbitrator: the grabber's message dispatcher.
//!
//! The arbitrator is an actor.  Everything that can change grab state arrives
//! as a [`GrabberEvent`] in one mailbox: lifecycle events and datagrams from
//! the grabber's server channel, lifecycle events from the link back to the
//! per-user session, process-exit notifications, device attach/detach from
//! the HID layer and control commands.  [`ConnectionArbitrator::run`]
//! handles them strictly one at a time.
//!
//! # Session peers
//!
//! At most one per-user session is tracked.  Each session gets a fresh
//! [`ChannelId`] generation; its link and its process monitor are created
//! with that id and stopped together.  Events that arrive later from an older
//! generation are dropped, so a replaced peer can never move the grab mode.
//!
//! ```text
//! connect (per-user) ──▶ tear down old peer ──▶ watch pid + open link
//! link connected     ──▶ configure engine  ──▶ Grabbing
//! link failed/closed ──▶ Observing          ──▶ system configuration, if any
//! process exited     ──▶ Observing          ──▶ system configuration, if any
//! ```
//!
//! # Observer restarts
//!
//! Report sequences are only ordered within one observer process.  A
//! `connect` from an observer pid other than the recorded one resets the
//! ledger, so the new instance's reports are not discarded as stale.
//!
//! # Server socket
//!
//! Failing to bind the grabber socket before it was ever bound ends
//! [`ConnectionArbitrator::run`] with [`ArbitratorError::ServerUnavailable`].
//! Once bound, later losses are rebound by the channel's reconnect timer.
//!
//! # Dependencies
//!
//! Sockets, processes and files sit behind [`PeerConnector`] and
//! [`HostEnvironment`]; devices behind [`DeviceSeizer`]; the remapping engine
//! behind [`RemappingEngine`].  The arbitrator itself performs no I/O.

use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use grabd_core::protocol::messages::{
    ConnectFrom, ConnectMessage, FrontmostApplication, InputSourceProperties, SystemPreferences,
};
use grabd_core::{
    decode_message, encode_message, DeviceGrabController, DeviceId, DeviceSeizer, GrabMode,
    GrabbableStateLedger, LedState, Message, ProtocolError,
};
use grabd_ipc::{ChannelError, ChannelEvent, ChannelId, Datagram, LifecycleEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::remapping::RemappingEngine;

/// Notification that a watched peer process has terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerExit {
    pub generation: ChannelId,
    pub pid: i32,
}

/// Reasons the arbitrator stops before being asked to.
#[derive(Debug, Error)]
pub enum ArbitratorError {
    /// The grabber socket could not be bound at startup.
    #[error("grabber socket could not be bound: {0}")]
    ServerUnavailable(#[source] ChannelError),
}

/// Everything the arbitrator reacts to.
#[derive(Debug)]
pub enum GrabberEvent {
    /// From the server channel or a session link.
    Channel(ChannelEvent),
    PeerExited(PeerExit),
    DeviceAttached(DeviceId),
    DeviceDetached(DeviceId),
    /// Host going to sleep.
    Suspend,
    Resume,
    /// Release every device now.
    Ungrab,
    /// Deliver a request to the per-user session, if one is connected.
    SendToSession(Message),
    Shutdown,
}

impl From<ChannelEvent> for GrabberEvent {
    fn from(event: ChannelEvent) -> Self {
        GrabberEvent::Channel(event)
    }
}

impl From<PeerExit> for GrabberEvent {
    fn from(exit: PeerExit) -> Self {
        GrabberEvent::PeerExited(exit)
    }
}

/// Client-role link from the grabber to a session's endpoint.
pub trait SessionLink: Send {
    fn send(&self, payload: Vec<u8>);

    /// Stops the link and its timers.  Idempotent.
    fn stop(&mut self);
}

/// Subscription to a peer process's exit.
pub trait PeerWatch: Send {
    /// Releases the subscription.  Idempotent.
    fn stop(&mut self);
}

/// Creates session links and process monitors whose events are delivered
/// back into the arbitrator's mailbox tagged with `generation`.
pub trait PeerConnector: Send {
    fn open_session_link(&mut self, generation: ChannelId, endpoint: &Path) -> Box<dyn SessionLink>;

    fn watch_process(&mut self, generation: ChannelId, pid: i32) -> Box<dyn PeerWatch>;
}

/// Filesystem facts and actions the arbitrator needs.
pub trait HostEnvironment: Send {
    /// Restricts the freshly bound server socket to its owner.
    fn secure_server_socket(&self) -> io::Result<()>;

    /// The system-wide configuration, if the file exists.
    fn fallback_configuration(&self) -> Option<PathBuf>;
}

struct SessionPeer {
    generation: ChannelId,
    pid: i32,
    configuration: Option<PathBuf>,
    link: Box<dyn SessionLink>,
    monitor: Box<dyn PeerWatch>,
    connected: bool,
}

/// Latest session state, replayed into the engine whenever a configuration
/// is (re)applied.
#[derive(Debug, Default, Clone)]
struct LatestState {
    caps_lock: Option<bool>,
    system_preferences: Option<SystemPreferences>,
    frontmost_application: Option<FrontmostApplication>,
    input_source: Option<InputSourceProperties>,
}

/// Owns the ledger and the grab-mode state machine for the lifetime of the
/// grabber process.
pub struct ConnectionArbitrator {
    server_channel: ChannelId,
    server_bound: bool,
    failure: Option<ArbitratorError>,
    ledger: GrabbableStateLedger,
    grab: DeviceGrabController,
    engine: Box<dyn RemappingEngine>,
    connector: Box<dyn PeerConnector>,
    host: Box<dyn HostEnvironment>,
    session: Option<SessionPeer>,
    observer_pid: Option<i32>,
    latest: LatestState,
    active_configuration: Option<PathBuf>,
}

impl ConnectionArbitrator {
    /// `server_channel` is the id of the grabber's own server channel; every
    /// other channel id is treated as a session generation.
    pub fn new(
        server_channel: ChannelId,
        seizer: Arc<dyn DeviceSeizer>,
        engine: Box<dyn RemappingEngine>,
        connector: Box<dyn PeerConnector>,
        host: Box<dyn HostEnvironment>,
    ) -> Self {
        Self {
            server_channel,
            server_bound: false,
            failure: None,
            ledger: GrabbableStateLedger::new(),
            grab: DeviceGrabController::new(seizer),
            engine,
            connector,
            host,
            session: None,
            observer_pid: None,
            latest: LatestState::default(),
            active_configuration: None,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn ledger(&self) -> &GrabbableStateLedger {
        &self.ledger
    }

    pub fn grab_mode(&self) -> GrabMode {
        self.grab.mode()
    }

    pub fn is_grabbed(&self, device_id: DeviceId) -> bool {
        self.grab.is_grabbed(device_id)
    }

    pub fn is_suspended(&self) -> bool {
        self.grab.is_suspended()
    }

    /// Pid of the tracked per-user session, connected or not.
    pub fn session_pid(&self) -> Option<i32> {
        self.session.as_ref().map(|s| s.pid)
    }

    pub fn session_generation(&self) -> Option<ChannelId> {
        self.session.as_ref().map(|s| s.generation)
    }

    pub fn observer_pid(&self) -> Option<i32> {
        self.observer_pid
    }

    pub fn active_configuration(&self) -> Option<&Path> {
        self.active_configuration.as_deref()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Applies the system-wide configuration if one exists.  Called once
    /// before the first event.
    pub fn start(&mut self) {
        info!("connection arbitrator started");
        self.fall_back_to_system_configuration();
    }

    /// Processes events until [`GrabberEvent::Shutdown`], a fatal server
    /// error or until every sender is gone, then releases everything.
    pub async fn run(mut self, mut events: mpsc::Receiver<GrabberEvent>) -> Result<(), ArbitratorError> {
        self.start();
        while let Some(event) = events.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }
        self.shutdown();
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Handles one event.  Returns `Break` on shutdown.
    pub fn handle(&mut self, event: GrabberEvent) -> ControlFlow<()> {
        match event {
            GrabberEvent::Channel(ChannelEvent { channel, event }) => {
                if channel == self.server_channel {
                    return self.on_server_event(event);
                } else if self.session_generation() == Some(channel) {
                    self.on_session_event(event);
                } else {
                    debug!(%channel, "dropping event from a replaced session link");
                }
            }
            GrabberEvent::PeerExited(exit) => self.on_peer_exit(exit),
            GrabberEvent::DeviceAttached(device_id) => {
                info!(%device_id, "device attached");
                self.grab.device_attached(device_id, &self.ledger);
            }
            GrabberEvent::DeviceDetached(device_id) => {
                info!(%device_id, "device detached");
                self.grab.device_detached(device_id);
                self.ledger.remove(device_id);
            }
            GrabberEvent::Suspend => self.grab.suspend(),
            GrabberEvent::Resume => self.grab.resume(&self.ledger),
            GrabberEvent::Ungrab => self.grab.enter_observing(),
            GrabberEvent::SendToSession(message) => self.send_to_session(&message),
            GrabberEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Tears down the session peer and releases every device.  Idempotent.
    pub fn shutdown(&mut self) {
        self.teardown_session();
        self.grab.enter_observing();
        info!("connection arbitrator stopped");
    }

    // ── Server channel ────────────────────────────────────────────────────────

    fn on_server_event(&mut self, event: LifecycleEvent) -> ControlFlow<()> {
        match event {
            LifecycleEvent::Connected => {
                info!("grabber socket bound; grab-eligibility state reset");
                self.server_bound = true;
                self.ledger.clear();
                if let Err(e) = self.host.secure_server_socket() {
                    error!(error = %e, "failed to restrict grabber socket permissions");
                }
            }
            LifecycleEvent::ConnectFailed(e) if !self.server_bound => {
                error!(error = %e, "failed to bind grabber socket");
                self.failure = Some(ArbitratorError::ServerUnavailable(e));
                return ControlFlow::Break(());
            }
            LifecycleEvent::ConnectFailed(e) => {
                error!(error = %e, "failed to rebind grabber socket; will retry");
            }
            LifecycleEvent::Closed => warn!("grabber socket closed; will rebind"),
            LifecycleEvent::Received(datagram) => self.on_datagram(datagram),
        }
        ControlFlow::Continue(())
    }

    fn on_datagram(&mut self, datagram: Datagram) {
        let message = match decode_message(&datagram.payload) {
            Ok(message) => message,
            Err(ProtocolError::Unknown(code)) => {
                debug!(code, "skipping unknown operation");
                return;
            }
            Err(e) => {
                warn!(error = %e, bytes = datagram.payload.len(), "dropping malformed datagram");
                return;
            }
        };
        self.dispatch(message, datagram.sender);
    }

    fn dispatch(&mut self, message: Message, sender: Option<PathBuf>) {
        match message {
            Message::Connect(ConnectMessage {
                pid,
                connect_from: ConnectFrom::Observer,
            }) => {
                if self.observer_pid != Some(pid) {
                    info!(pid, previous = ?self.observer_pid, "observer connected; grab-eligibility state reset");
                    self.ledger.clear();
                } else {
                    info!(pid, "observer reconnected");
                }
                self.observer_pid = Some(pid);
            }
            Message::Connect(ConnectMessage {
                pid,
                connect_from: ConnectFrom::ConsoleUserServer,
            }) => self.session_connected(pid, sender, None),
            Message::ConnectConsoleUserServer(connect) => {
                self.session_connected(connect.pid, sender, Some(connect.configuration_path))
            }
            Message::GrabbableStateChanged(state) => {
                if self.ledger.update(state) {
                    debug!(device_id = %state.device_id, status = ?state.status, sequence = state.sequence, "grabbable state changed");
                    self.grab.reevaluate(state.device_id, &self.ledger);
                }
            }
            Message::CapsLockStateChanged(on) => {
                self.latest.caps_lock = Some(on);
                self.engine.set_caps_lock_state(on);
                self.grab.set_caps_lock_led(LedState::from(on));
            }
            Message::SetCapsLockLedState(led) => self.grab.set_caps_lock_led(led),
            Message::SystemPreferencesUpdated(preferences) => {
                self.engine.set_system_preferences(&preferences);
                self.latest.system_preferences = Some(preferences);
            }
            Message::FrontmostApplicationChanged(application) => {
                self.engine.set_frontmost_application(&application);
                self.latest.frontmost_application = Some(application);
            }
            Message::InputSourceChanged(properties) => {
                self.engine.set_input_source(&properties);
                self.latest.input_source = Some(properties);
            }
            Message::ClearSimpleModifications => self.engine.clear_simple_modifications(),
            Message::AddSimpleModification(modification) => {
                self.engine.add_simple_modification(modification)
            }
            other @ (Message::ShellCommandExecution(_)
            | Message::SelectInputSource(_)
            | Message::SetNotificationMessage(_)) => {
                debug!(operation = ?other.operation_type(), "ignoring session-bound request");
            }
        }
    }

    // ── Session peer ──────────────────────────────────────────────────────────

    fn session_connected(&mut self, pid: i32, sender: Option<PathBuf>, configuration: Option<PathBuf>) {
        self.teardown_session();

        let Some(endpoint) = sender else {
            warn!(pid, "session connected from an unbound socket; cannot reply");
            self.session_lost();
            return;
        };
        let configuration = configuration
            .filter(|path| !path.as_os_str().is_empty())
            .or_else(|| self.host.fallback_configuration());

        let generation = ChannelId::new();
        let monitor = self.connector.watch_process(generation, pid);
        let link = self.connector.open_session_link(generation, &endpoint);
        info!(pid, %generation, endpoint = %endpoint.display(), "session connecting");
        self.session = Some(SessionPeer {
            generation,
            pid,
            configuration,
            link,
            monitor,
            connected: false,
        });
    }

    fn on_session_event(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Connected => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.connected = true;
                let pid = session.pid;
                match session.configuration.clone() {
                    Some(configuration) => {
                        info!(pid, "session link connected");
                        self.apply_configuration(configuration);
                    }
                    None => {
                        info!(pid, "session link connected without a configuration; observing");
                        self.grab.enter_observing();
                    }
                }
            }
            LifecycleEvent::ConnectFailed(e) => {
                warn!(error = %e, "session link failed");
                self.session_lost();
            }
            LifecycleEvent::Closed => {
                warn!("session link closed");
                self.session_lost();
            }
            LifecycleEvent::Received(datagram) => {
                debug!(bytes = datagram.payload.len(), "ignoring datagram on session link");
            }
        }
    }

    fn on_peer_exit(&mut self, exit: PeerExit) {
        if self.session_generation() != Some(exit.generation) {
            debug!(pid = exit.pid, "exit of a replaced session process");
            return;
        }
        warn!(pid = exit.pid, "session process exited");
        self.session_lost();
    }

    /// Fail-safe path: release first, then consider the system configuration.
    fn session_lost(&mut self) {
        self.teardown_session();
        self.grab.enter_observing();
        self.engine.clear_configuration();
        self.active_configuration = None;
        self.fall_back_to_system_configuration();
    }

    fn teardown_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.link.stop();
            session.monitor.stop();
            debug!(pid = session.pid, generation = %session.generation, "session peer torn down");
        }
    }

    fn fall_back_to_system_configuration(&mut self) {
        if self.session.is_some() {
            return;
        }
        match self.host.fallback_configuration() {
            Some(configuration) => {
                info!(path = %configuration.display(), "using system-wide configuration");
                self.apply_configuration(configuration);
            }
            None => debug!("no system-wide configuration; observing"),
        }
    }

    fn apply_configuration(&mut self, configuration: PathBuf) {
        self.engine.set_configuration(&configuration);
        if let Some(on) = self.latest.caps_lock {
            self.engine.set_caps_lock_state(on);
        }
        if let Some(preferences) = &self.latest.system_preferences {
            self.engine.set_system_preferences(preferences);
        }
        if let Some(application) = &self.latest.frontmost_application {
            self.engine.set_frontmost_application(application);
        }
        if let Some(properties) = &self.latest.input_source {
            self.engine.set_input_source(properties);
        }
        self.active_configuration = Some(configuration);
        self.grab.enter_grabbing(&self.ledger);
    }

    fn send_to_session(&mut self, message: &Message) {
        let Some(session) = self.session.as_ref().filter(|s| s.connected) else {
            debug!(operation = ?message.operation_type(), "no connected session; request dropped");
            return;
        };
        match encode_message(message) {
            Ok(bytes) => session.link.send(bytes),
            Err(e) => warn!(error = %e, "failed to encode session request"),
        }
    }
}
