//! PING round trips and stream resets.

mod helpers;

use bytes::Bytes;
use filament::{Config, Connection, ErrorCode, Event};
use helpers::mock_peer::{self, MockPeer};
use http::Method;

#[tokio::test]
async fn ping_round_trip_surfaces_pong() {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let (handle, mut events) = Connection::open(client_io, Config::default()).await.unwrap();
    let mut peer = MockPeer::new(server_io);
    peer.handshake(&[(0x3, 100)]).await;

    handle.ping().unwrap();

    let ping = peer.read_frame().await;
    assert_eq!(ping.frame_type, mock_peer::PING);
    assert_eq!(ping.flags & mock_peer::FLAG_ACK, 0);
    assert_eq!(ping.payload.len(), 8);

    // Echo the opaque payload back as an ACK.
    let mut opaque = [0u8; 8];
    opaque.copy_from_slice(&ping.payload);
    peer.send_ping(opaque, true).await;

    match events.recv().await.unwrap() {
        Event::Pong => {}
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn inbound_ping_is_echoed_as_ack() {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let (_handle, mut events) = Connection::open(client_io, Config::default()).await.unwrap();
    let mut peer = MockPeer::new(server_io);
    peer.handshake(&[(0x3, 100)]).await;

    let opaque = [9u8, 8, 7, 6, 5, 4, 3, 2];
    peer.send_ping(opaque, false).await;

    let echo = peer.read_frame().await;
    assert_eq!(echo.frame_type, mock_peer::PING);
    assert_eq!(echo.flags & mock_peer::FLAG_ACK, mock_peer::FLAG_ACK);
    assert_eq!(&echo.payload[..], &opaque);

    match events.recv().await.unwrap() {
        Event::Ping => {}
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn rst_stream_fails_only_the_addressed_request() {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let (handle, mut events) = Connection::open(client_io, Config::default()).await.unwrap();
    let mut peer = MockPeer::new(server_io);
    peer.handshake(&[(0x3, 100)]).await;

    let reset_token = handle
        .request(
            Method::GET,
            "https://example.com/reset".parse().unwrap(),
            vec![],
            Bytes::new(),
        )
        .unwrap();
    let survivor_token = handle
        .request(
            Method::GET,
            "https://example.com/ok".parse().unwrap(),
            vec![],
            Bytes::new(),
        )
        .unwrap();
    let _headers = peer.read_frame().await;
    let _headers = peer.read_frame().await;

    peer.send_rst_stream(1, ErrorCode::Cancel.as_u32()).await;
    match events.recv().await.unwrap() {
        Event::RequestFailed { token, error } => {
            assert_eq!(token, reset_token);
            assert!(matches!(
                error,
                filament::Error::Stream {
                    id: 1,
                    code: ErrorCode::Cancel
                }
            ));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // The connection stays up: stream 3 completes normally.
    let block = peer.encode_block(&[(":status", "200")]);
    peer.send_headers(3, &block, true, true).await;
    match events.recv().await.unwrap() {
        Event::Response { token, response } => {
            assert_eq!(token, survivor_token);
            assert_eq!(response.status, 200);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // An RST_STREAM for a stream that never existed is dropped quietly.
    peer.send_rst_stream(99, 0x8).await;
    handle.ping().unwrap();
    let ping = peer.read_frame().await;
    assert_eq!(ping.frame_type, mock_peer::PING);
}
