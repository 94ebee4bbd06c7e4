//! [`SessionActions`] for a desktop Linux session.
//!
//! Shell commands run as `sh -c <command>` with stdin closed; the child is
//! reaped by a background task so it never lingers as a zombie.  Input source
//! selection and notifications have no portable desktop API, so they are
//! logged for whatever watches this agent's output.

use std::process::Stdio;

use grabd_core::protocol::messages::InputSourceSpecifier;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::application::actions::{ActionError, SessionActions};

#[derive(Debug, Default)]
pub struct SystemActions;

impl SystemActions {
    pub fn new() -> Self {
        Self
    }
}

impl SessionActions for SystemActions {
    fn execute_shell_command(&mut self, command: &str) -> Result<(), ActionError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| ActionError::Spawn {
                command: command.to_string(),
                source,
            })?;
        let command = command.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!(%command, "shell command finished"),
                Ok(status) => warn!(%command, %status, "shell command failed"),
                Err(e) => warn!(%command, error = %e, "could not wait for shell command"),
            }
        });
        Ok(())
    }

    fn select_input_source(&mut self, specifiers: &[InputSourceSpecifier]) -> Result<(), ActionError> {
        let Some(first) = specifiers.first() else {
            return Err(ActionError::NoMatchingInputSource("an empty list".to_string()));
        };
        info!(
            language = first.language.as_deref().unwrap_or("*"),
            input_source_id = first.input_source_id.as_deref().unwrap_or("*"),
            input_mode_id = first.input_mode_id.as_deref().unwrap_or("*"),
            candidates = specifiers.len(),
            "input source selection requested"
        );
        Ok(())
    }

    fn show_notification(&mut self, message: &str) -> Result<(), ActionError> {
        if message.is_empty() {
            debug!("notification cleared");
        } else {
            info!(%message, "notification");
        }
        Ok(())
    }
}
