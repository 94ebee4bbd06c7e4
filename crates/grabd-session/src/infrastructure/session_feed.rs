//! Session-state feed: JSON lines on standard input.
//!
//! A desktop integration script (window-manager hook, input-method watcher)
//! writes one object per change:
//!
//! ```text
//! {"kind":"frontmost_application","bundle_identifier":"org.gnome.Terminal","file_path":"/usr/bin/gnome-terminal"}
//! {"kind":"input_source","language":"de","input_source_id":"xkb:de::ger"}
//! {"kind":"system_preferences","key_repeat_milliseconds":30}
//! ```
//!
//! Bad lines are logged and skipped.  End of input ends the feed, not the
//! agent.

use grabd_core::protocol::messages::{
    FrontmostApplication, InputSourceProperties, SystemPreferences,
};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::application::agent::SessionEvent;

/// One line of the feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionUpdate {
    FrontmostApplication(FrontmostApplication),
    InputSource(InputSourceProperties),
    SystemPreferences(SystemPreferences),
}

impl From<SessionUpdate> for SessionEvent {
    fn from(update: SessionUpdate) -> Self {
        match update {
            SessionUpdate::FrontmostApplication(app) => SessionEvent::FrontmostApplicationChanged(app),
            SessionUpdate::InputSource(props) => SessionEvent::InputSourceChanged(props),
            SessionUpdate::SystemPreferences(prefs) => SessionEvent::SystemPreferencesChanged(prefs),
        }
    }
}

/// Parses one line; blank lines yield `None`.
pub fn parse_update(line: &str) -> Result<Option<SessionUpdate>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Forwards every update read from `reader` into the agent's mailbox.
pub async fn pump<R>(reader: R, events: mpsc::Sender<SessionEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("session feed ended");
                return;
            }
            Err(e) => {
                warn!(error = %e, "session feed read failed");
                return;
            }
        };
        match parse_update(&line) {
            Ok(Some(update)) => {
                if events.send(update.into()).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "skipping malformed session update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frontmost_application() {
        let line = r#"{"kind":"frontmost_application","bundle_identifier":"org.example.editor","file_path":"/usr/bin/editor"}"#;

        let update = parse_update(line).expect("parse");

        assert_eq!(
            update,
            Some(SessionUpdate::FrontmostApplication(FrontmostApplication {
                bundle_identifier: "org.example.editor".to_string(),
                file_path: "/usr/bin/editor".to_string(),
            }))
        );
    }

    #[test]
    fn test_parse_partial_preferences_uses_defaults() {
        let update = parse_update(r#"{"kind":"system_preferences","key_repeat_milliseconds":30}"#)
            .expect("parse");

        let Some(SessionUpdate::SystemPreferences(prefs)) = update else {
            panic!("expected preferences, got {update:?}");
        };
        assert_eq!(prefs.key_repeat_milliseconds, 30);
        assert_eq!(prefs.initial_key_repeat_milliseconds, 500);
    }

    #[test]
    fn test_blank_line_is_ignored() {
        assert_eq!(parse_update("   ").expect("parse"), None);
    }

    #[test]
    fn test_pump_skips_bad_lines_and_stops_at_eof() {
        // Arrange
        let input: &[u8] = b"not json\n{\"kind\":\"input_source\",\"language\":\"fr\"}\n\n{\"kind\":\"unknown\"}\n";
        let (tx, mut rx) = mpsc::channel(8);

        // Act
        tokio_test::block_on(pump(input, tx));

        // Assert
        let Ok(SessionEvent::InputSourceChanged(props)) = rx.try_recv() else {
            panic!("expected an input source event");
        };
        assert_eq!(props.language.as_deref(), Some("fr"));
        assert!(rx.try_recv().is_err());
    }
}
