//! Send-side flow control: stream windows gate DATA, WINDOW_UPDATE
//! re-triggers the drain, and frames never exceed the peer's frame size.

mod helpers;

use std::time::Duration;

use bytes::Bytes;
use filament::{Config, Connection, Event};
use helpers::mock_peer::{self, MockPeer};
use http::Method;
use tokio::time::timeout;

#[tokio::test]
async fn exhausted_stream_window_blocks_until_window_update() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let (handle, mut events) = Connection::open(client_io, Config::default()).await.unwrap();
    let mut peer = MockPeer::new(server_io);

    // Streams open with a 10-byte send window.
    peer.handshake(&[(0x3, 100), (0x4, 10)]).await;

    let token = handle
        .request(
            Method::POST,
            "https://example.com/upload".parse().unwrap(),
            vec![],
            Bytes::from_static(b"abcdefghijklmnopqrstuvwxy"), // 25 bytes
        )
        .unwrap();

    let headers = peer.read_frame().await;
    assert_eq!(headers.frame_type, mock_peer::HEADERS);
    assert_eq!(
        headers.flags & mock_peer::FLAG_END_STREAM,
        0,
        "a request with a body must not end the stream on HEADERS"
    );

    // Exactly the window's worth of DATA, then silence.
    let data = peer.read_frame().await;
    assert_eq!(data.frame_type, mock_peer::DATA);
    assert_eq!(&data.payload[..], b"abcdefghij");
    assert_eq!(data.flags & mock_peer::FLAG_END_STREAM, 0);

    let blocked = timeout(Duration::from_millis(100), peer.read_frame()).await;
    assert!(blocked.is_err(), "client sent DATA past the stream window");

    // Fresh credit on both levels releases the remaining 15 bytes in one
    // frame.
    peer.send_window_update(1, 15).await;
    peer.send_window_update(0, 15).await;

    let data = peer.read_frame().await;
    assert_eq!(data.frame_type, mock_peer::DATA);
    assert_eq!(&data.payload[..], b"klmnopqrstuvwxy");
    assert_eq!(
        data.flags & mock_peer::FLAG_END_STREAM,
        mock_peer::FLAG_END_STREAM
    );

    let block = peer.encode_block(&[(":status", "200")]);
    peer.send_headers(1, &block, true, true).await;
    match events.recv().await.unwrap() {
        Event::Response { token: t, response } => {
            assert_eq!(t, token);
            assert_eq!(response.status, 200);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn data_frames_are_bounded_by_max_frame_size() {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let (handle, _events) = Connection::open(client_io, Config::default()).await.unwrap();
    let mut peer = MockPeer::new(server_io);
    peer.handshake(&[(0x3, 100)]).await;

    let body = vec![7u8; 40_000];
    handle
        .request(
            Method::POST,
            "https://example.com/bulk".parse().unwrap(),
            vec![],
            Bytes::from(body.clone()),
        )
        .unwrap();

    let headers = peer.read_frame().await;
    assert_eq!(headers.frame_type, mock_peer::HEADERS);

    let mut received = 0usize;
    loop {
        let data = peer.read_frame().await;
        assert_eq!(data.frame_type, mock_peer::DATA);
        assert!(
            data.payload.len() <= 16_384,
            "DATA frame of {} bytes exceeds MAX_FRAME_SIZE",
            data.payload.len()
        );
        received += data.payload.len();
        if data.flags & mock_peer::FLAG_END_STREAM != 0 {
            break;
        }
    }
    assert_eq!(received, body.len());
}

#[tokio::test]
async fn window_overflow_is_a_connection_error() {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let (_handle, mut events) = Connection::open(client_io, Config::default()).await.unwrap();
    let mut peer = MockPeer::new(server_io);
    peer.handshake(&[(0x3, 100)]).await;

    // The connection send window starts at 65535, so a maximal increment
    // pushes it past 2^31-1.
    peer.send_window_update(0, 0x7fff_ffff).await;

    let goaway = peer.read_frame().await;
    assert_eq!(goaway.frame_type, mock_peer::GOAWAY);
    let error_code = u32::from_be_bytes([
        goaway.payload[4],
        goaway.payload[5],
        goaway.payload[6],
        goaway.payload[7],
    ]);
    assert_eq!(error_code, 0x3, "expected FLOW_CONTROL_ERROR");

    match events.recv().await.unwrap() {
        Event::Closed { error } => {
            assert!(matches!(error, Some(filament::Error::FlowControl(_))));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}
