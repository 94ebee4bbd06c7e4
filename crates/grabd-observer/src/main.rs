//! grabd device observer entry point.
//!
//! Reads device observations from standard input and keeps the grabber's
//! grab-eligibility ledger current over an unbound client channel.

use anyhow::Context;
use tokio::io::BufReader;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use grabd_ipc::{ChannelHandle, ChannelId, UnixClientTransport};
use grabd_observer::application::agent::{DeviceObserverAgent, ObserverEvent};
use grabd_observer::infrastructure::observation_feed;
use grabd_observer::infrastructure::storage::config::{config_file_path, load_config};

const MAILBOX_DEPTH: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_file_path();
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.observer.log_level)),
        )
        .init();

    info!(grabber = %config.channel.socket_path.display(), "grabd observer starting");

    let (events_tx, events_rx) = mpsc::channel::<ObserverEvent>(MAILBOX_DEPTH);
    let channel = ChannelHandle::start(
        ChannelId::new(),
        UnixClientTransport::new(&config.channel.socket_path, config.channel.buffer_size),
        config.channel.policy(),
        events_tx.clone(),
    );
    let agent = DeviceObserverAgent::new(std::process::id() as i32, Box::new(channel));
    let agent_task = tokio::spawn(agent.run(events_rx));

    let feed = tokio::spawn(observation_feed::pump(
        BufReader::new(tokio::io::stdin()),
        events_tx.clone(),
    ));

    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        _ = terminate.recv() => info!("shutdown signal received"),
    }
    feed.abort();
    // The agent may already be gone if the mailbox closed.
    let _ = events_tx.send(ObserverEvent::Shutdown).await;
    agent_task.await.context("observer task failed")?;

    info!("grabd observer stopped");
    Ok(())
}
