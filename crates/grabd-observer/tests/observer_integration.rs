//! The observer over a real socket, with a bare datagram socket playing the
//! grabber and the feed reading from an in-memory buffer.

use std::path::PathBuf;
use std::time::Duration;

use grabd_core::protocol::messages::{ConnectFrom, ConnectMessage};
use grabd_core::{decode_message, DeviceId, GrabbableStatus, Message, UngrabbableReason};
use grabd_ipc::{ChannelHandle, ChannelId, ReconnectPolicy, UnixClientTransport};
use grabd_observer::application::agent::{DeviceObserverAgent, ObserverEvent};
use grabd_observer::infrastructure::observation_feed;
use tokio::net::UnixDatagram;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn next_message(grabber: &UnixDatagram) -> Message {
    let mut buf = vec![0u8; 4096];
    loop {
        let len = timeout(WAIT, grabber.recv(&mut buf))
            .await
            .expect("datagram in time")
            .expect("recv");
        if len > 0 {
            return decode_message(&buf[..len]).expect("decode");
        }
    }
}

#[tokio::test]
async fn test_feed_lines_become_reports_at_the_grabber() {
    // Arrange
    let grabber_path =
        std::env::temp_dir().join(format!("grabd-obs-grabber-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&grabber_path);
    let grabber = UnixDatagram::bind(&grabber_path).expect("bind grabber");
    let (tx, rx) = mpsc::channel(32);
    let channel = ChannelHandle::start(
        ChannelId::new(),
        UnixClientTransport::new(PathBuf::from(&grabber_path), 4096),
        ReconnectPolicy::default(),
        tx.clone(),
    );
    let task = tokio::spawn(DeviceObserverAgent::new(31, Box::new(channel)).run(rx));
    assert_eq!(
        next_message(&grabber).await,
        Message::Connect(ConnectMessage {
            pid: 31,
            connect_from: ConnectFrom::Observer,
        })
    );

    // Act
    let feed: &[u8] = b"{\"kind\":\"attached\",\"device_id\":5}\n\
        {\"kind\":\"input\",\"device_id\":5,\"key\":{\"key\":225},\"pressed\":true}\n";
    observation_feed::pump(feed, tx.clone()).await;

    // Assert
    let Message::GrabbableStateChanged(attached) = next_message(&grabber).await else {
        panic!("expected a grabbable report");
    };
    let Message::GrabbableStateChanged(held) = next_message(&grabber).await else {
        panic!("expected a grabbable report");
    };
    assert_eq!(attached.device_id, DeviceId(5));
    assert_eq!(attached.status, GrabbableStatus::Grabbable);
    assert_eq!(
        held.status,
        GrabbableStatus::Ungrabbable(UngrabbableReason::ModifierKeyPressed)
    );
    assert!(held.sequence > attached.sequence);

    tx.send(ObserverEvent::Shutdown).await.expect("mailbox");
    timeout(WAIT, task).await.expect("agent stops").expect("agent task");
    let _ = std::fs::remove_file(&grabber_path);
}
