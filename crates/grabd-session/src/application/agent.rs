//! SessionAgent: the per-user side of the grabber conversation.
//!
//! The agent owns one client channel to the grabber, bound at this user's
//! endpoint so the grabber can open its link back.  Every time the channel
//! reports `connected` the agent re-announces itself from scratch; the
//! grabber may have restarted and forgotten everything.
//!
//! ```text
//! connected ──▶ connect_console_user_server {pid, configuration}
//!           ──▶ system_preferences_updated
//!           ──▶ frontmost_application_changed   (if known)
//!           ──▶ input_source_changed            (if known)
//! ```
//!
//! Session-state changes are cached whether or not the grabber is reachable
//! and sent only while connected.

use std::ops::ControlFlow;
use std::path::PathBuf;

use grabd_core::protocol::messages::{
    ConnectConsoleUserServerMessage, FrontmostApplication, InputSourceProperties,
    SystemPreferences,
};
use grabd_core::{decode_message, encode_message, Message, ProtocolError};
use grabd_ipc::{ChannelEvent, LifecycleEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::actions::SessionActions;

/// Everything the agent reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    Channel(ChannelEvent),
    SystemPreferencesChanged(SystemPreferences),
    FrontmostApplicationChanged(FrontmostApplication),
    InputSourceChanged(InputSourceProperties),
    Shutdown,
}

impl From<ChannelEvent> for SessionEvent {
    fn from(event: ChannelEvent) -> Self {
        SessionEvent::Channel(event)
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

pub struct SessionAgent {
    pid: i32,
    configuration_path: PathBuf,
    link: Box<dyn GrabberLink>,
    actions: Box<dyn SessionActions>,
    connected: bool,
    system_preferences: SystemPreferences,
    frontmost_application: Option<FrontmostApplication>,
    input_source: Option<InputSourceProperties>,
}

impl SessionAgent {
    pub fn new(
        pid: i32,
        configuration_path: PathBuf,
        system_preferences: SystemPreferences,
        link: Box<dyn GrabberLink>,
        actions: Box<dyn SessionActions>,
    ) -> Self {
        Self {
            pid,
            configuration_path,
            link,
            actions,
            connected: false,
            system_preferences,
            frontmost_application: None,
            input_source: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn system_preferences(&self) -> &SystemPreferences {
        &self.system_preferences
    }

    /// Processes events until [`SessionEvent::Shutdown`] or until every
    /// sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) {
        info!(pid = self.pid, "session agent started");
        while let Some(event) = events.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }
        info!("session agent stopped");
    }

    /// Handles one event.  Returns `Break` on shutdown.
    pub fn handle(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match event {
            SessionEvent::Channel(ChannelEvent { event, .. }) => self.on_channel_event(event),
            SessionEvent::SystemPreferencesChanged(preferences) => {
                if preferences != self.system_preferences {
                    self.system_preferences = preferences;
                    self.send(&Message::SystemPreferencesUpdated(preferences));
                }
            }
            SessionEvent::FrontmostApplicationChanged(application) => {
                if self.frontmost_application.as_ref() != Some(&application) {
                    self.send(&Message::FrontmostApplicationChanged(application.clone()));
                    self.frontmost_application = Some(application);
                }
            }
            SessionEvent::InputSourceChanged(properties) => {
                if self.input_source.as_ref() != Some(&properties) {
                    self.send(&Message::InputSourceChanged(properties.clone()));
                    self.input_source = Some(properties);
                }
            }
            SessionEvent::Shutdown => return ControlFlow::Break(()),
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
            LifecycleEvent::Received(datagram) => match decode_message(&datagram.payload) {
                Ok(message) => self.on_request(message),
                Err(ProtocolError::Unknown(code)) => debug!(code, "skipping unknown operation"),
                Err(e) => warn!(error = %e, "dropping malformed datagram"),
            },
        }
    }

    fn announce(&mut self) {
        self.send(&Message::ConnectConsoleUserServer(
            ConnectConsoleUserServerMessage {
                pid: self.pid,
                configuration_path: self.configuration_path.clone(),
            },
        ));
        self.send(&Message::SystemPreferencesUpdated(self.system_preferences));
        if let Some(application) = self.frontmost_application.clone() {
            self.send(&Message::FrontmostApplicationChanged(application));
        }
        if let Some(properties) = self.input_source.clone() {
            self.send(&Message::InputSourceChanged(properties));
        }
    }

    fn on_request(&mut self, message: Message) {
        let result = match &message {
            Message::ShellCommandExecution(command) => {
                info!(%command, "executing shell command");
                self.actions.execute_shell_command(command)
            }
            Message::SelectInputSource(specifiers) => self.actions.select_input_source(specifiers),
            Message::SetNotificationMessage(text) => self.actions.show_notification(text),
            other => {
                debug!(operation = ?other.operation_type(), "ignoring message not meant for a session");
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(operation = ?message.operation_type(), error = %e, "request failed");
        }
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
