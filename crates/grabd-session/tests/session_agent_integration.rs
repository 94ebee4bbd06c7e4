//! The session agent over real sockets, with a bare datagram socket playing
//! the grabber.

use std::path::PathBuf;
use std::time::Duration;

use grabd_core::protocol::messages::{ConnectConsoleUserServerMessage, SystemPreferences};
use grabd_core::{decode_message, encode_message, Message};
use grabd_ipc::{ChannelHandle, ChannelId, ReconnectPolicy, UnixClientTransport};
use grabd_session::application::actions::{ActionCall, RecordingActions};
use grabd_session::application::agent::{SessionAgent, SessionEvent};
use tokio::net::UnixDatagram;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("grabd-sess-{name}-{}.sock", std::process::id()))
}

/// Next non-probe message the fake grabber receives.
async fn next_message(grabber: &UnixDatagram) -> (Message, Option<PathBuf>) {
    let mut buf = vec![0u8; 4096];
    loop {
        let (len, addr) = timeout(WAIT, grabber.recv_from(&mut buf))
            .await
            .expect("datagram in time")
            .expect("recv");
        if len == 0 {
            continue;
        }
        let message = decode_message(&buf[..len]).expect("decode");
        return (message, addr.as_pathname().map(PathBuf::from));
    }
}

#[tokio::test]
async fn test_agent_announces_itself_and_executes_requests() {
    // Arrange
    let grabber_path = socket_path("grabber");
    let endpoint = socket_path("endpoint");
    let _ = std::fs::remove_file(&grabber_path);
    let grabber = UnixDatagram::bind(&grabber_path).expect("bind grabber");

    let (tx, rx) = mpsc::channel(32);
    let channel = ChannelHandle::start(
        ChannelId::new(),
        UnixClientTransport::new(&grabber_path, 4096).with_local_path(&endpoint),
        ReconnectPolicy {
            reconnect_interval: Some(Duration::from_millis(20)),
            server_check_interval: Some(Duration::from_millis(50)),
        },
        tx.clone(),
    );
    let actions = RecordingActions::new();
    let agent = SessionAgent::new(
        77,
        PathBuf::from("/home/u/profile.json"),
        SystemPreferences::default(),
        Box::new(channel),
        Box::new(actions.clone()),
    );
    let task = tokio::spawn(agent.run(rx));

    // Act 1
    let (connect, sender) = next_message(&grabber).await;
    let (preferences, _) = next_message(&grabber).await;

    // Assert 1
    assert_eq!(
        connect,
        Message::ConnectConsoleUserServer(ConnectConsoleUserServerMessage {
            pid: 77,
            configuration_path: PathBuf::from("/home/u/profile.json"),
        })
    );
    assert_eq!(sender, Some(endpoint.clone()));
    assert_eq!(
        preferences,
        Message::SystemPreferencesUpdated(SystemPreferences::default())
    );

    // Act 2: the grabber asks for a notification.
    let request = encode_message(&Message::SetNotificationMessage("grab paused".to_string()))
        .expect("encode");
    grabber.send_to(&request, &endpoint).await.expect("send");

    // Assert 2
    let deadline = Instant::now() + WAIT;
    while actions.calls().is_empty() {
        assert!(Instant::now() < deadline, "request never executed");
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        actions.calls(),
        vec![ActionCall::Notification("grab paused".to_string())]
    );

    tx.send(SessionEvent::Shutdown).await.expect("mailbox");
    timeout(WAIT, task).await.expect("agent stops").expect("agent task");
    let _ = std::fs::remove_file(&grabber_path);
}
