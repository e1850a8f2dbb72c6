//! Integration tests for the client connection.
//!
//! A plain `tokio::net::TcpListener` stands in for the server so each test
//! controls exactly which bytes reach the client and can inspect exactly
//! which bytes the client writes.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use msgstream_client::{ClientConfig, ClientError, ClientEvent, StreamClient};
use msgstream_core::protocol::{FrameHeader, RawCodec};
use msgstream_core::transport::{FrameReader, TransportError};

const WAIT: Duration = Duration::from_secs(5);

type Events = UnboundedReceiver<ClientEvent<Vec<u8>>>;

async fn connected_pair() -> (StreamClient<RawCodec>, Events, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connected, accepted) = tokio::join!(
        StreamClient::connect(addr, RawCodec, ClientConfig::default()),
        listener.accept()
    );
    let (client, events) = connected.expect("client connect");
    let (peer, _) = accepted.expect("accept");
    (client, events, peer)
}

async fn next(events: &mut Events) -> ClientEvent<Vec<u8>> {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn frame(component_id: u16, msg_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = FrameHeader::new(component_id, msg_type, payload.len() as u32)
        .to_bytes()
        .to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    // Arrange: bind then drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    // Act
    let result = StreamClient::connect(addr, RawCodec, ClientConfig::default()).await;

    // Assert
    assert!(matches!(result, Err(ClientError::ConnectFailed(_))));
}

#[tokio::test]
async fn test_sent_frames_match_wire_format_and_order() {
    // Arrange
    let (client, _events, peer) = connected_pair().await;
    let mut reader = FrameReader::new(peer, 1024, usize::MAX);

    // Act
    client.send(5, 10, &b"X".to_vec()).unwrap();
    client.send(5, 11, &b"second".to_vec()).unwrap();

    // Assert
    let (header, payload) = timeout(WAIT, reader.read_frame()).await.unwrap().unwrap();
    assert_eq!(header, FrameHeader::new(5, 10, 1));
    assert_eq!(payload, b"X");
    let (header, payload) = timeout(WAIT, reader.read_frame()).await.unwrap().unwrap();
    assert_eq!(header.msg_type, 11);
    assert_eq!(payload, b"second");
}

#[tokio::test]
async fn test_received_frames_become_events() {
    let (_client, mut events, mut peer) = connected_pair().await;

    let mut wire = frame(2000, 20, b"state");
    wire.extend(frame(2000, 21, b""));
    peer.write_all(&wire).await.unwrap();

    match next(&mut events).await {
        ClientEvent::MessageReceived {
            component_id,
            msg_type,
            message,
        } => {
            assert_eq!((component_id, msg_type), (2000, 20));
            assert_eq!(message, b"state");
        }
        other => panic!("expected MessageReceived, got {other:?}"),
    }
    assert!(matches!(
        next(&mut events).await,
        ClientEvent::MessageReceived { msg_type: 21, ref message, .. } if message.is_empty()
    ));
}

#[tokio::test]
async fn test_peer_close_reports_disconnect_and_blocks_sends() {
    // Arrange
    let (client, mut events, peer) = connected_pair().await;

    // Act
    drop(peer);

    // Assert
    assert!(matches!(
        next(&mut events).await,
        ClientEvent::Disconnected {
            reason: TransportError::Closed
        }
    ));
    assert!(!client.is_connected());
    assert!(matches!(
        client.send(1, 1, &b"late".to_vec()),
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn test_local_disconnect_is_reported_once_and_peer_sees_eof() {
    // Arrange
    let (client, mut events, peer) = connected_pair().await;
    let mut reader = FrameReader::new(peer, 1024, usize::MAX);

    // Act
    client.disconnect();
    client.disconnect();

    // Assert
    assert!(matches!(
        next(&mut events).await,
        ClientEvent::Disconnected {
            reason: TransportError::ClosedLocally
        }
    ));
    assert!(matches!(
        timeout(WAIT, reader.read_frame()).await.unwrap(),
        Err(TransportError::Closed)
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_oversized_frame_from_server_ends_connection() {
    let config = ClientConfig {
        max_payload_size: 8,
        ..ClientConfig::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connected, accepted) = tokio::join!(
        StreamClient::connect(addr, RawCodec, config),
        listener.accept()
    );
    let (_client, mut events) = connected.unwrap();
    let (mut peer, _) = accepted.unwrap();

    peer.write_all(&FrameHeader::new(1, 1, 9).to_bytes()).await.unwrap();

    assert!(matches!(
        next(&mut events).await,
        ClientEvent::Disconnected {
            reason: TransportError::PayloadTooLarge { size: 9, limit: 8 }
        }
    ));
}
