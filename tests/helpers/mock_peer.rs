//! A scriptable mock HTTP/2 server peer.
//!
//! Speaks raw frames over one end of an in-memory duplex pipe, letting
//! tests script exact frame sequences (including protocol violations) and
//! assert on every byte the client emits. Carries its own HPACK encoder
//! and decoder so header blocks stay synchronized across a test.

// Each test binary uses a different subset of the peer's surface.
#![allow(dead_code)]

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const FRAME_HEADER_SIZE: usize = 9;
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

// Frame type codes.
pub const DATA: u8 = 0x0;
pub const HEADERS: u8 = 0x1;
pub const RST_STREAM: u8 = 0x3;
pub const SETTINGS: u8 = 0x4;
pub const PUSH_PROMISE: u8 = 0x5;
pub const PING: u8 = 0x6;
pub const GOAWAY: u8 = 0x7;
pub const WINDOW_UPDATE: u8 = 0x8;
pub const CONTINUATION: u8 = 0x9;

// Flags.
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;

/// One frame as read off the wire.
#[derive(Debug)]
pub struct RawFrame {
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl RawFrame {
    /// Interpret the payload as a WINDOW_UPDATE increment.
    pub fn window_increment(&self) -> u32 {
        assert_eq!(self.frame_type, WINDOW_UPDATE);
        u32::from_be_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]) & 0x7fff_ffff
    }
}

pub struct MockPeer {
    io: DuplexStream,
    buf: BytesMut,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
}

impl MockPeer {
    pub fn new(io: DuplexStream) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(8192),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
        }
    }

    /// Encode a header block with this peer's HPACK state.
    pub fn encode_block(&mut self, headers: &[(&str, &str)]) -> Bytes {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
            .collect();
        Bytes::from(self.encoder.encode(pairs))
    }

    /// Decode a client-sent header block with this peer's HPACK state.
    pub fn decode_block(&mut self, block: &[u8]) -> Vec<(String, String)> {
        self.decoder
            .decode(block)
            .expect("client sent an undecodable header block")
            .into_iter()
            .map(|(name, value)| {
                (
                    String::from_utf8(name).unwrap(),
                    String::from_utf8(value).unwrap(),
                )
            })
            .collect()
    }

    async fn fill(&mut self, wanted: usize) {
        while self.buf.len() < wanted {
            let n = self.io.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "client closed the connection while reading");
        }
    }

    /// Read and verify the 24-octet connection preface.
    pub async fn read_preface(&mut self) {
        self.fill(PREFACE.len()).await;
        let preface = self.buf.split_to(PREFACE.len());
        assert_eq!(&preface[..], PREFACE, "client sent a bad preface");
    }

    /// Read the next complete frame.
    pub async fn read_frame(&mut self) -> RawFrame {
        self.fill(FRAME_HEADER_SIZE).await;
        let length = ((self.buf[0] as usize) << 16) | ((self.buf[1] as usize) << 8)
            | (self.buf[2] as usize);
        let frame_type = self.buf[3];
        let flags = self.buf[4];
        let stream_id = ((self.buf[5] as u32 & 0x7f) << 24)
            | ((self.buf[6] as u32) << 16)
            | ((self.buf[7] as u32) << 8)
            | (self.buf[8] as u32);

        self.fill(FRAME_HEADER_SIZE + length).await;
        self.buf.advance(FRAME_HEADER_SIZE);
        let payload = self.buf.split_to(length).freeze();

        RawFrame {
            frame_type,
            flags,
            stream_id,
            payload,
        }
    }

    async fn send_frame(&mut self, frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_u8((payload.len() >> 16) as u8);
        buf.put_u8((payload.len() >> 8) as u8);
        buf.put_u8(payload.len() as u8);
        buf.put_u8(frame_type);
        buf.put_u8(flags);
        buf.put_u32(stream_id & 0x7fff_ffff);
        buf.extend_from_slice(payload);
        self.io.write_all(&buf).await.unwrap();
        self.io.flush().await.unwrap();
    }

    pub async fn send_settings(&mut self, entries: &[(u16, u32)]) {
        let mut payload = BytesMut::with_capacity(entries.len() * 6);
        for (id, value) in entries {
            payload.put_u16(*id);
            payload.put_u32(*value);
        }
        self.send_frame(SETTINGS, 0, 0, &payload).await;
    }

    pub async fn send_settings_ack(&mut self) {
        self.send_frame(SETTINGS, FLAG_ACK, 0, &[]).await;
    }

    pub async fn send_headers(
        &mut self,
        stream_id: u32,
        block: &[u8],
        end_headers: bool,
        end_stream: bool,
    ) {
        let mut flags = 0u8;
        if end_headers {
            flags |= FLAG_END_HEADERS;
        }
        if end_stream {
            flags |= FLAG_END_STREAM;
        }
        self.send_frame(HEADERS, flags, stream_id, block).await;
    }

    pub async fn send_continuation(&mut self, stream_id: u32, block: &[u8], end_headers: bool) {
        let flags = if end_headers { FLAG_END_HEADERS } else { 0 };
        self.send_frame(CONTINUATION, flags, stream_id, block).await;
    }

    pub async fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        let flags = if end_stream { FLAG_END_STREAM } else { 0 };
        self.send_frame(DATA, flags, stream_id, data).await;
    }

    pub async fn send_push_promise(
        &mut self,
        stream_id: u32,
        promised_stream_id: u32,
        block: &[u8],
        end_headers: bool,
    ) {
        let mut payload = BytesMut::with_capacity(4 + block.len());
        payload.put_u32(promised_stream_id & 0x7fff_ffff);
        payload.extend_from_slice(block);
        let flags = if end_headers { FLAG_END_HEADERS } else { 0 };
        self.send_frame(PUSH_PROMISE, flags, stream_id, &payload).await;
    }

    pub async fn send_window_update(&mut self, stream_id: u32, increment: u32) {
        self.send_frame(WINDOW_UPDATE, 0, stream_id, &increment.to_be_bytes())
            .await;
    }

    pub async fn send_ping(&mut self, payload: [u8; 8], ack: bool) {
        let flags = if ack { FLAG_ACK } else { 0 };
        self.send_frame(PING, flags, 0, &payload).await;
    }

    pub async fn send_rst_stream(&mut self, stream_id: u32, error_code: u32) {
        self.send_frame(RST_STREAM, 0, stream_id, &error_code.to_be_bytes())
            .await;
    }

    pub async fn send_goaway(&mut self, last_stream_id: u32, error_code: u32) {
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32(last_stream_id);
        payload.put_u32(error_code);
        self.send_frame(GOAWAY, 0, 0, &payload).await;
    }

    /// Run the server side of a standard handshake: consume the preface and
    /// the client's SETTINGS, announce `entries`, exchange ACKs, and absorb
    /// the client's bulk connection WINDOW_UPDATE.
    pub async fn handshake(&mut self, entries: &[(u16, u32)]) {
        self.read_preface().await;

        let client_settings = self.read_frame().await;
        assert_eq!(client_settings.frame_type, SETTINGS);
        assert_eq!(client_settings.flags & FLAG_ACK, 0);

        self.send_settings(entries).await;
        let ack = self.read_frame().await;
        assert_eq!(ack.frame_type, SETTINGS);
        assert_eq!(ack.flags & FLAG_ACK, FLAG_ACK);

        self.send_settings_ack().await;
        let bulk = self.read_frame().await;
        assert_eq!(bulk.frame_type, WINDOW_UPDATE);
        assert_eq!(bulk.stream_id, 0);
        // 2^31-1 minus the 65535-byte default initial window.
        assert_eq!(bulk.window_increment(), 2_147_418_112);
    }
}
