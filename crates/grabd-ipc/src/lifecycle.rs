//! The liveness/reconnect state machine.
//!
//! [`ChannelHandle::start`] spawns one task that owns a [`Transport`] and is
//! the only place its state changes.  Commands from the owner, received
//! datagrams and timer expiries are all handled one at a time inside that
//! task's `select!` loop.
//!
//! ```text
//!  Idle ──start──▶ Connecting ──ok──▶ Connected
//!                    │   ▲               │
//!            failed  │   │ reconnect     │ check failed / recv error
//!                    ▼   │ timer         ▼
//!                   Closed ◀─────────────┘
//! ```
//!
//! Every transition out of `Connecting` or `Connected` produces exactly one
//! [`LifecycleEvent`] in the owner's mailbox, and at most one reconnect is
//! ever pending.  Events carry the handle's [`ChannelId`] so an owner can
//! drop late events from a channel it has already replaced.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{ChannelError, Datagram, Transport};

/// Default delay before retrying a failed or lost channel.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default period of the liveness check on a connected channel.
pub const DEFAULT_SERVER_CHECK_INTERVAL: Duration = Duration::from_millis(3000);

/// Timer settings.  `None` disables the corresponding timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub reconnect_interval: Option<Duration>,
    pub server_check_interval: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect_interval: Some(DEFAULT_RECONNECT_INTERVAL),
            server_check_interval: Some(DEFAULT_SERVER_CHECK_INTERVAL),
        }
    }
}

impl ReconnectPolicy {
    /// Checks liveness but never reconnects on its own.
    pub fn without_reconnect(self) -> Self {
        Self {
            reconnect_interval: None,
            ..self
        }
    }
}

/// Identifies one channel generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Connecting,
    Connected,
    Closed,
}

/// What the state machine reports to its owner.
///
/// For a server-role transport `Connected` means "bound".
#[derive(Debug)]
pub enum LifecycleEvent {
    Connected,
    ConnectFailed(ChannelError),
    Closed,
    Received(Datagram),
}

/// A [`LifecycleEvent`] tagged with the channel it came from.
#[derive(Debug)]
pub struct ChannelEvent {
    pub channel: ChannelId,
    pub event: LifecycleEvent,
}

enum Command {
    Send(Vec<u8>),
}

/// Owner's handle on a running channel.
///
/// Dropping the handle stops the channel.
pub struct ChannelHandle {
    id: ChannelId,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LifecycleState>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    /// Starts driving `transport`: opens it immediately and then follows
    /// `policy`.  Events are delivered to `events` converted with `E::from`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<T, E>(
        id: ChannelId,
        transport: T,
        policy: ReconnectPolicy,
        events: mpsc::Sender<E>,
    ) -> Self
    where
        T: Transport,
        E: From<ChannelEvent> + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LifecycleState::Idle);
        let machine = Lifecycle {
            id,
            transport,
            policy,
            events,
            commands: commands_rx,
            state: state_tx,
            reconnect_at: None,
            check_at: None,
        };
        let task = tokio::spawn(machine.run());
        Self {
            id,
            commands: commands_tx,
            state: state_rx,
            task: Some(task),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Last state published by the channel task; `Idle` once stopped.
    pub fn state(&self) -> LifecycleState {
        if self.task.is_none() {
            return LifecycleState::Idle;
        }
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Queues a datagram.  Dropped (with a debug log) unless connected.
    pub fn send(&self, payload: Vec<u8>) {
        if self.commands.send(Command::Send(payload)).is_err() {
            debug!(channel = %self.id, "send on stopped channel ignored");
        }
    }

    /// Stops the channel and cancels its timers.  Idempotent.
    ///
    /// The task is aborted, so it never runs again; an event it had already
    /// queued may still be in the owner's mailbox, which is why events carry
    /// the channel id.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(channel = %self.id, "channel stopped");
        }
    }

    /// Stops the channel and waits until its task has finished.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The owner dropped its mailbox; the channel has no one to report to.
struct OwnerGone;

enum Step {
    Command(Option<Command>),
    Received(Result<Datagram, ChannelError>),
    Check,
    Reconnect,
}

struct Lifecycle<T, E> {
    id: ChannelId,
    transport: T,
    policy: ReconnectPolicy,
    events: mpsc::Sender<E>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<LifecycleState>,
    reconnect_at: Option<Instant>,
    check_at: Option<Instant>,
}

impl<T, E> Lifecycle<T, E>
where
    T: Transport,
    E: From<ChannelEvent> + Send + 'static,
{
    async fn run(mut self) {
        let _ = self.drive().await;
        self.transport.close();
    }

    async fn drive(&mut self) -> Result<(), OwnerGone> {
        self.open().await?;
        loop {
            let connected = *self.state.borrow() == LifecycleState::Connected;
            let check_at = self.check_at;
            let reconnect_at = self.reconnect_at;

            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                received = self.transport.recv(), if connected => Step::Received(received),
                _ = time::sleep_until(check_at.unwrap_or_else(Instant::now)), if connected && check_at.is_some() => Step::Check,
                _ = time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => Step::Reconnect,
            };

            match step {
                Step::Command(None) => return Err(OwnerGone),
                Step::Command(Some(Command::Send(payload))) => self.send(payload).await?,
                Step::Received(Ok(datagram)) => {
                    // Zero-length datagrams are liveness probes.
                    if !datagram.payload.is_empty() {
                        self.emit(LifecycleEvent::Received(datagram)).await?;
                    }
                }
                Step::Received(Err(e)) => {
                    warn!(channel = %self.id, endpoint = %self.transport.endpoint().display(), error = %e, "receive failed");
                    self.closed().await?;
                }
                Step::Check => match self.transport.check().await {
                    Ok(()) => self.check_at = self.policy.server_check_interval.map(|i| Instant::now() + i),
                    Err(e) => {
                        info!(channel = %self.id, endpoint = %self.transport.endpoint().display(), error = %e, "liveness check failed");
                        self.closed().await?;
                    }
                },
                Step::Reconnect => {
                    self.reconnect_at = None;
                    self.open().await?;
                }
            }
        }
    }

    async fn open(&mut self) -> Result<(), OwnerGone> {
        self.set_state(LifecycleState::Connecting);
        match self.transport.open().await {
            Ok(()) => {
                info!(channel = %self.id, endpoint = %self.transport.endpoint().display(), "channel connected");
                self.set_state(LifecycleState::Connected);
                self.check_at = self
                    .policy
                    .server_check_interval
                    .map(|interval| Instant::now() + interval);
                self.emit(LifecycleEvent::Connected).await
            }
            Err(e) => {
                warn!(channel = %self.id, endpoint = %self.transport.endpoint().display(), error = %e, "channel connect failed");
                self.set_state(LifecycleState::Closed);
                self.schedule_reconnect();
                self.emit(LifecycleEvent::ConnectFailed(e)).await
            }
        }
    }

    async fn closed(&mut self) -> Result<(), OwnerGone> {
        self.transport.close();
        self.set_state(LifecycleState::Closed);
        self.check_at = None;
        self.schedule_reconnect();
        self.emit(LifecycleEvent::Closed).await
    }

    async fn send(&mut self, payload: Vec<u8>) -> Result<(), OwnerGone> {
        if *self.state.borrow() != LifecycleState::Connected {
            debug!(channel = %self.id, bytes = payload.len(), "dropping datagram while not connected");
            return Ok(());
        }
        match self.transport.send(&payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(channel = %self.id, endpoint = %self.transport.endpoint().display(), error = %e, "send failed");
                self.closed().await
            }
        }
    }

    /// Arms the reconnect timer.  Re-arming replaces the pending deadline, so
    /// at most one attempt is ever scheduled.
    fn schedule_reconnect(&mut self) {
        self.reconnect_at = self
            .policy
            .reconnect_interval
            .map(|interval| Instant::now() + interval);
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.send_replace(state);
    }

    async fn emit(&mut self, event: LifecycleEvent) -> Result<(), OwnerGone> {
        self.events
            .send(E::from(ChannelEvent {
                channel: self.id,
                event,
            }))
            .await
            .map_err(|_| OwnerGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelError;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted transport: fails `open` a fixed number of times, then succeeds.
    struct ScriptedTransport {
        failures_left: usize,
        opens: Arc<AtomicUsize>,
        check_ok: Arc<Mutex<bool>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        path: PathBuf,
    }

    impl ScriptedTransport {
        fn failing(times: usize) -> Self {
            Self {
                failures_left: times,
                opens: Arc::new(AtomicUsize::new(0)),
                check_ok: Arc::new(Mutex::new(true)),
                sent: Arc::new(Mutex::new(Vec::new())),
                path: PathBuf::from("/scripted"),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&mut self) -> Result<(), ChannelError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(ChannelError::NotOpen);
            }
            *self.check_ok.lock().unwrap() = true;
            Ok(())
        }

        async fn check(&mut self) -> Result<(), ChannelError> {
            if *self.check_ok.lock().unwrap() {
                Ok(())
            } else {
                Err(ChannelError::SocketRemoved(self.path.clone()))
            }
        }

        async fn send(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Datagram, ChannelError> {
            std::future::pending().await
        }

        fn close(&mut self) {}

        fn endpoint(&self) -> &Path {
            &self.path
        }
    }

    fn kind(event: &ChannelEvent) -> &'static str {
        match event.event {
            LifecycleEvent::Connected => "connected",
            LifecycleEvent::ConnectFailed(_) => "connect_failed",
            LifecycleEvent::Closed => "closed",
            LifecycleEvent::Received(_) => "received",
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_until_success_then_stop_retrying() {
        // Arrange
        let transport = ScriptedTransport::failing(3);
        let opens = Arc::clone(&transport.opens);
        let (tx, mut rx) = mpsc::channel::<ChannelEvent>(16);

        // Act
        let handle = ChannelHandle::start(ChannelId::new(), transport, ReconnectPolicy::default(), tx);
        let mut kinds = Vec::new();
        for _ in 0..4 {
            let event = rx.recv().await.expect("event");
            kinds.push(kind(&event));
        }
        let quiet = time::timeout(Duration::from_secs(60), rx.recv()).await;

        // Assert
        assert_eq!(
            kinds,
            vec!["connect_failed", "connect_failed", "connect_failed", "connected"]
        );
        assert!(quiet.is_err(), "no events after connecting");
        assert_eq!(opens.load(Ordering::SeqCst), 4);
        assert_eq!(handle.state(), LifecycleState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_spaced_by_reconnect_interval() {
        // Arrange
        let transport = ScriptedTransport::failing(2);
        let (tx, mut rx) = mpsc::channel::<ChannelEvent>(16);
        let started = Instant::now();

        // Act
        let _handle = ChannelHandle::start(ChannelId::new(), transport, ReconnectPolicy::default(), tx);
        let mut at = Vec::new();
        for _ in 0..3 {
            rx.recv().await.expect("event");
            at.push(Instant::now() - started);
        }

        // Assert: no busy loop, one attempt per interval.
        assert_eq!(at[0], Duration::ZERO);
        assert_eq!(at[1], DEFAULT_RECONNECT_INTERVAL);
        assert_eq!(at[2], DEFAULT_RECONNECT_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_check_reports_closed_then_reconnects() {
        // Arrange
        let transport = ScriptedTransport::failing(0);
        let check_ok = Arc::clone(&transport.check_ok);
        let (tx, mut rx) = mpsc::channel::<ChannelEvent>(16);
        let _handle = ChannelHandle::start(ChannelId::new(), transport, ReconnectPolicy::default(), tx);
        assert_eq!(kind(&rx.recv().await.expect("connected")), "connected");

        // Act
        *check_ok.lock().unwrap() = false;
        let closed = rx.recv().await.expect("closed");
        let reconnected = rx.recv().await.expect("reconnected");

        // Assert
        assert_eq!(kind(&closed), "closed");
        assert_eq!(kind(&reconnected), "connected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_reconnect_stays_closed() {
        let transport = ScriptedTransport::failing(1);
        let opens = Arc::clone(&transport.opens);
        let (tx, mut rx) = mpsc::channel::<ChannelEvent>(16);
        let policy = ReconnectPolicy::default().without_reconnect();

        let handle = ChannelHandle::start(ChannelId::new(), transport, policy, tx);
        let first = rx.recv().await.expect("event");
        let quiet = time::timeout(Duration::from_secs(60), rx.recv()).await;

        assert_eq!(kind(&first), "connect_failed");
        assert!(quiet.is_err());
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), LifecycleState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_reconnect_and_is_idempotent() {
        // Arrange
        let transport = ScriptedTransport::failing(usize::MAX);
        let opens = Arc::clone(&transport.opens);
        let (tx, mut rx) = mpsc::channel::<ChannelEvent>(16);
        let mut handle = ChannelHandle::start(ChannelId::new(), transport, ReconnectPolicy::default(), tx);
        rx.recv().await.expect("first failure");

        // Act
        handle.stop();
        handle.stop();
        time::sleep(Duration::from_secs(30)).await;

        // Assert
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), LifecycleState::Idle);
        assert!(rx.recv().await.is_none(), "task and its sender are gone");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_is_delivered_only_while_connected() {
        // Arrange
        let transport = ScriptedTransport::failing(1);
        let sent = Arc::clone(&transport.sent);
        let (tx, mut rx) = mpsc::channel::<ChannelEvent>(16);
        let handle = ChannelHandle::start(ChannelId::new(), transport, ReconnectPolicy::default(), tx);
        rx.recv().await.expect("connect_failed");

        // Act
        handle.send(b"early".to_vec());
        rx.recv().await.expect("connected");
        handle.send(b"late".to_vec());
        time::sleep(Duration::from_millis(10)).await;

        // Assert
        assert_eq!(*sent.lock().unwrap(), vec![b"late".to_vec()]);
    }

    /// A transport that may move between threads but not be shared.
    struct SingleOwnerTransport {
        opens: std::cell::Cell<usize>,
        path: PathBuf,
    }

    #[async_trait]
    impl Transport for SingleOwnerTransport {
        async fn open(&mut self) -> Result<(), ChannelError> {
            self.opens.set(self.opens.get() + 1);
            Ok(())
        }

        async fn check(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn send(&mut self, _payload: &[u8]) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Datagram, ChannelError> {
            std::future::pending().await
        }

        fn close(&mut self) {}

        fn endpoint(&self) -> &Path {
            &self.path
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transport_needs_send_but_not_sync() {
        // Arrange
        let transport = SingleOwnerTransport {
            opens: std::cell::Cell::new(0),
            path: PathBuf::from("/single-owner"),
        };
        let (tx, mut rx) = mpsc::channel::<ChannelEvent>(4);

        // Act
        let handle = ChannelHandle::start(ChannelId::new(), transport, ReconnectPolicy::default(), tx);
        let event = rx.recv().await.expect("event");

        // Assert
        assert_eq!(kind(&event), "connected");
        assert_eq!(handle.state(), LifecycleState::Connected);
    }

    #[tokio::test]
    async fn test_events_carry_channel_id() {
        let id = ChannelId::new();
        let (tx, mut rx) = mpsc::channel::<ChannelEvent>(4);

        let _handle = ChannelHandle::start(id, ScriptedTransport::failing(0), ReconnectPolicy::default(), tx);
        let event = rx.recv().await.expect("event");

        assert_eq!(event.channel, id);
    }
}
