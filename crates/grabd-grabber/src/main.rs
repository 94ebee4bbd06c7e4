//! grabd grabber entry point.
//!
//! Wires the infrastructure adapters to the connection arbitrator and runs
//! until SIGINT or SIGTERM.
//!
//! ```text
//! main()
//!  ├─ ChannelHandle (server role, grabber socket) ──┐
//!  ├─ DeviceScanner (evdev attach/detach)   ────────┤
//!  ├─ signal forwarder                      ────────┼──▶ mailbox ──▶ ConnectionArbitrator
//!  └─ UnixPeerConnector (session links, pid watch) ─┘
//! ```
//!
//! Signals: SIGUSR1 suspends grabbing, SIGUSR2 resumes it.
//!
//! Exits non-zero when the grabber socket cannot be bound at startup.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use grabd_core::DeviceSeizer;
use grabd_grabber::application::arbitrator::{ConnectionArbitrator, GrabberEvent};
use grabd_grabber::application::remapping::SimpleRemappingEngine;
use grabd_grabber::infrastructure::devices::{DeviceScanner, EvdevSeizer};
use grabd_grabber::infrastructure::host::FilesystemHost;
use grabd_grabber::infrastructure::peer_links::UnixPeerConnector;
use grabd_grabber::infrastructure::storage::config::{config_file_path, load_config};
use grabd_ipc::paths::{ensure_socket_dir, remove_stale_socket};
use grabd_ipc::{ChannelHandle, ChannelId, UnixServerTransport};

/// Capacity of the arbitrator's mailbox.
const MAILBOX_DEPTH: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_file_path();
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.grabber.log_level)),
        )
        .init();

    info!(config = %config_path.display(), "grabd grabber starting");

    let socket_path = config.channel.socket_path.clone();
    ensure_socket_dir(&socket_path)
        .with_context(|| format!("creating directory for {}", socket_path.display()))?;

    let signals = ProcessSignals::install()?;
    let (events_tx, events_rx) = mpsc::channel::<GrabberEvent>(MAILBOX_DEPTH);

    // ── Server channel ────────────────────────────────────────────────────────
    let server_id = ChannelId::new();
    let server = ChannelHandle::start(
        server_id,
        UnixServerTransport::new(&socket_path, config.channel.buffer_size)
            .with_owner(config.grabber.console_user_id),
        config.channel.policy(),
        events_tx.clone(),
    );

    // ── Arbitrator ────────────────────────────────────────────────────────────
    let seizer: Arc<dyn DeviceSeizer> = Arc::new(EvdevSeizer::default());
    let connector = UnixPeerConnector::new(
        events_tx.clone(),
        config.channel.policy(),
        config.channel.buffer_size,
        config.grabber.process_poll_interval(),
    );
    let host = FilesystemHost::new(
        socket_path.clone(),
        config.grabber.console_user_id,
        config.grabber.system_configuration_path.clone(),
    );
    let arbitrator = ConnectionArbitrator::new(
        server_id,
        seizer,
        Box::new(SimpleRemappingEngine::new()),
        Box::new(connector),
        Box::new(host),
    );
    let arbitrator_task = tokio::spawn(arbitrator.run(events_rx));

    // ── Devices ───────────────────────────────────────────────────────────────
    let scanner = DeviceScanner::start(config.grabber.device_scan_interval(), events_tx.clone());

    info!(socket = %socket_path.display(), "grabd grabber starting arbitration");

    let forwarder = tokio::spawn(signals.forward(events_tx));
    let outcome = arbitrator_task.await.context("arbitrator task failed")?;

    forwarder.abort();
    drop(scanner);
    server.shutdown().await;
    outcome.with_context(|| format!("serving {}", socket_path.display()))?;
    remove_stale_socket(&socket_path)
        .with_context(|| format!("removing {}", socket_path.display()))?;

    info!("grabd grabber stopped");
    Ok(())
}

/// Handlers for the signals the grabber reacts to.
struct ProcessSignals {
    terminate: Signal,
    suspend: Signal,
    resume: Signal,
}

impl ProcessSignals {
    fn install() -> anyhow::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate()).context("installing SIGTERM handler")?,
            suspend: signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?,
            resume: signal(SignalKind::user_defined2()).context("installing SIGUSR2 handler")?,
        })
    }

    /// Turns signals into arbitrator events until shutdown is requested.
    async fn forward(mut self, events: mpsc::Sender<GrabberEvent>) {
        loop {
            let event = tokio::select! {
                _ = tokio::signal::ctrl_c() => GrabberEvent::Shutdown,
                _ = self.terminate.recv() => GrabberEvent::Shutdown,
                _ = self.suspend.recv() => GrabberEvent::Suspend,
                _ = self.resume.recv() => GrabberEvent::Resume,
            };
            let done = matches!(event, GrabberEvent::Shutdown);
            if done {
                info!("shutdown signal received");
            }
            if events.send(event).await.is_err() || done {
                return;
            }
        }
    }
}
