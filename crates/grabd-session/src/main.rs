//! grabd session agent entry point.
//!
//! Runs inside a user's desktop session.  Binds this user's endpoint, keeps a
//! channel to the grabber alive and feeds it the session's configuration and
//! state.
//!
//! ```text
//! main()
//!  ├─ ChannelHandle (client role, bound at the per-user endpoint) ─┐
//!  ├─ session feed (JSON lines on stdin)                     ──────┼──▶ SessionAgent
//!  └─ signal forwarder (SIGHUP reloads preferences)          ──────┘
//! ```

use anyhow::Context;
use tokio::io::BufReader;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use grabd_ipc::paths::{current_uid, ensure_socket_dir, remove_stale_socket, session_socket_path};
use grabd_ipc::{ChannelHandle, ChannelId, UnixClientTransport};
use grabd_session::application::agent::{SessionAgent, SessionEvent};
use grabd_session::infrastructure::actions::SystemActions;
use grabd_session::infrastructure::session_feed;
use grabd_session::infrastructure::storage::config::{config_file_path, load_config};

const MAILBOX_DEPTH: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_file_path().context("locating session config")?;
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.session.log_level)),
        )
        .init();

    let uid = current_uid();
    let endpoint = config
        .session
        .endpoint_path
        .clone()
        .unwrap_or_else(|| session_socket_path(uid));
    ensure_socket_dir(&endpoint)
        .with_context(|| format!("creating directory for {}", endpoint.display()))?;
    let configuration_path = config
        .configuration_path()
        .context("locating remapping configuration")?;

    info!(
        uid,
        endpoint = %endpoint.display(),
        configuration = %configuration_path.display(),
        "grabd session agent starting"
    );

    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(MAILBOX_DEPTH);
    let channel = ChannelHandle::start(
        ChannelId::new(),
        UnixClientTransport::new(&config.channel.socket_path, config.channel.buffer_size)
            .with_local_path(&endpoint),
        config.channel.policy(),
        events_tx.clone(),
    );
    let agent = SessionAgent::new(
        std::process::id() as i32,
        configuration_path,
        config.preferences,
        Box::new(channel),
        Box::new(SystemActions::new()),
    );
    let agent_task = tokio::spawn(agent.run(events_rx));

    let feed = tokio::spawn(session_feed::pump(
        BufReader::new(tokio::io::stdin()),
        events_tx.clone(),
    ));

    forward_signals(events_tx, config_path).await?;
    agent_task.await.context("session agent task failed")?;
    feed.abort();
    if let Err(e) = remove_stale_socket(&endpoint) {
        warn!(endpoint = %endpoint.display(), error = %e, "could not remove endpoint");
    }

    info!("grabd session agent stopped");
    Ok(())
}

/// Turns process signals into agent events until shutdown is requested.
async fn forward_signals(
    events: mpsc::Sender<SessionEvent>,
    config_path: std::path::PathBuf,
) -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => SessionEvent::Shutdown,
            _ = terminate.recv() => SessionEvent::Shutdown,
            _ = hangup.recv() => match load_config(&config_path) {
                Ok(config) => {
                    info!("configuration reloaded");
                    SessionEvent::SystemPreferencesChanged(config.preferences)
                }
                Err(e) => {
                    warn!(error = %e, "reload failed; keeping current preferences");
                    continue;
                }
            },
        };
        let done = matches!(event, SessionEvent::Shutdown);
        if events.send(event).await.is_err() || done {
            return Ok(());
        }
    }
}
