//! Integration tests for the lifecycle over real Unix datagram sockets.
//!
//! A server channel and a bound client channel run against each other in one
//! runtime, exactly as the grabber and the session agent do.

use std::path::PathBuf;
use std::time::Duration;

use grabd_ipc::{
    ChannelEvent, ChannelHandle, ChannelId, LifecycleEvent, ReconnectPolicy, UnixClientTransport,
    UnixServerTransport,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("grabd-it-{name}-{}.sock", std::process::id()))
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        reconnect_interval: Some(Duration::from_millis(20)),
        server_check_interval: Some(Duration::from_millis(20)),
    }
}

async fn next(rx: &mut mpsc::Receiver<ChannelEvent>) -> LifecycleEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel alive")
        .event
}

#[tokio::test]
async fn test_client_started_before_server_connects_once_server_binds() {
    // Arrange: the client starts first and must keep retrying.
    let server_path = socket_path("late-server");
    let client_path = socket_path("late-client");
    let (client_tx, mut client_rx) = mpsc::channel(32);
    let client = ChannelHandle::start(
        ChannelId::new(),
        UnixClientTransport::new(&server_path, 4096).with_local_path(&client_path),
        fast_policy(),
        client_tx,
    );
    assert!(matches!(next(&mut client_rx).await, LifecycleEvent::ConnectFailed(_)));

    // Act
    let (server_tx, mut server_rx) = mpsc::channel(32);
    let server = ChannelHandle::start(
        ChannelId::new(),
        UnixServerTransport::new(&server_path, 4096),
        fast_policy(),
        server_tx,
    );
    assert!(matches!(next(&mut server_rx).await, LifecycleEvent::Connected));

    // Assert: the client eventually connects and its datagrams arrive.
    loop {
        match next(&mut client_rx).await {
            LifecycleEvent::Connected => break,
            LifecycleEvent::ConnectFailed(_) => continue,
            other => panic!("unexpected {other:?}"),
        }
    }
    client.send(b"ping".to_vec());
    let LifecycleEvent::Received(datagram) = next(&mut server_rx).await else {
        panic!("expected a datagram");
    };
    assert_eq!(datagram.payload, b"ping");
    assert_eq!(datagram.sender, Some(client_path.clone()));

    server.shutdown().await;
    client.shutdown().await;
}

#[tokio::test]
async fn test_removed_server_socket_is_closed_and_rebound() {
    // Arrange
    let server_path = socket_path("rebind");
    let (tx, mut rx) = mpsc::channel(32);
    let server = ChannelHandle::start(
        ChannelId::new(),
        UnixServerTransport::new(&server_path, 4096),
        fast_policy(),
        tx,
    );
    assert!(matches!(next(&mut rx).await, LifecycleEvent::Connected));

    // Act
    std::fs::remove_file(&server_path).expect("remove socket");

    // Assert
    assert!(matches!(next(&mut rx).await, LifecycleEvent::Closed));
    assert!(matches!(next(&mut rx).await, LifecycleEvent::Connected));
    assert!(server_path.exists());

    server.shutdown().await;
}

#[tokio::test]
async fn test_client_reports_closed_when_server_goes_away() {
    // Arrange
    let server_path = socket_path("gone");
    let (server_tx, mut server_rx) = mpsc::channel(32);
    let server = ChannelHandle::start(
        ChannelId::new(),
        UnixServerTransport::new(&server_path, 4096),
        fast_policy(),
        server_tx,
    );
    assert!(matches!(next(&mut server_rx).await, LifecycleEvent::Connected));
    let (client_tx, mut client_rx) = mpsc::channel(32);
    let client = ChannelHandle::start(
        ChannelId::new(),
        UnixClientTransport::new(&server_path, 4096),
        fast_policy().without_reconnect(),
        client_tx,
    );
    assert!(matches!(next(&mut client_rx).await, LifecycleEvent::Connected));

    // Act
    server.shutdown().await;

    // Assert
    assert!(matches!(next(&mut client_rx).await, LifecycleEvent::Closed));
    client.shutdown().await;
}
