//! Requests the grabber may make of a user session.

use grabd_core::protocol::messages::InputSourceSpecifier;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no input source matches {0}")]
    NoMatchingInputSource(String),
}

/// Carries out grabber requests inside the user's session.
pub trait SessionActions: Send {
    /// Starts `command` with the user's shell semantics and returns without
    /// waiting for it.
    fn execute_shell_command(&mut self, command: &str) -> Result<(), ActionError>;

    /// Switches to the first installed input source matching any specifier.
    fn select_input_source(&mut self, specifiers: &[InputSourceSpecifier]) -> Result<(), ActionError>;

    fn show_notification(&mut self, message: &str) -> Result<(), ActionError>;
}

/// One entry per request, for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionCall {
    Shell(String),
    SelectInputSource(Vec<InputSourceSpecifier>),
    Notification(String),
}

/// [`SessionActions`] that records requests and performs none of them.
#[derive(Debug, Clone, Default)]
pub struct RecordingActions {
    calls: std::sync::Arc<std::sync::Mutex<Vec<ActionCall>>>,
}

impl RecordingActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ActionCall> {
        self.calls.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn record(&self, call: ActionCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl SessionActions for RecordingActions {
    fn execute_shell_command(&mut self, command: &str) -> Result<(), ActionError> {
        self.record(ActionCall::Shell(command.to_string()));
        Ok(())
    }

    fn select_input_source(&mut self, specifiers: &[InputSourceSpecifier]) -> Result<(), ActionError> {
        self.record(ActionCall::SelectInputSource(specifiers.to_vec()));
        Ok(())
    }

    fn show_notification(&mut self, message: &str) -> Result<(), ActionError> {
        self.record(ActionCall::Notification(message.to_string()));
        Ok(())
    }
}
