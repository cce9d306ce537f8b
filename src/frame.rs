//! HTTP/2 frame types and wire codec.
//!
//! Implements the RFC 9113 frame layer: the 9-octet frame header, typed
//! payloads for the nine frame types this crate speaks, and a re-entrant
//! decoder that drains complete frames out of a byte accumulator.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Frame header size (9 bytes per RFC 9113).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Default maximum frame size (16KB per RFC 9113).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// HTTP/2 connection preface (client must send this first).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame type identifiers per RFC 9113.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(v: u8) -> Self {
        match v {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        match ft {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(v) => v,
        }
    }
}

/// Frame flags.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1; // Same value, different context (SETTINGS/PING)
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// SETTINGS frame parameter identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsId {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

impl From<SettingsId> for u16 {
    fn from(id: SettingsId) -> Self {
        id as u16
    }
}

/// HTTP/2 error codes per RFC 9113 Section 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    /// Codes this crate does not know are carried through verbatim;
    /// RFC 9113 says they must be treated as equivalent to INTERNAL_ERROR,
    /// not rejected.
    Unknown(u32),
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::NoError => 0x0,
            Self::ProtocolError => 0x1,
            Self::InternalError => 0x2,
            Self::FlowControlError => 0x3,
            Self::SettingsTimeout => 0x4,
            Self::StreamClosed => 0x5,
            Self::FrameSizeError => 0x6,
            Self::RefusedStream => 0x7,
            Self::Cancel => 0x8,
            Self::CompressionError => 0x9,
            Self::ConnectError => 0xa,
            Self::EnhanceYourCalm => 0xb,
            Self::InadequateSecurity => 0xc,
            Self::Http11Required => 0xd,
            Self::Unknown(v) => v,
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse a frame header from bytes.
    ///
    /// The caller must supply at least [`FRAME_HEADER_SIZE`] bytes.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        debug_assert!(buf.len() >= FRAME_HEADER_SIZE);

        let length = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32);
        let frame_type = FrameType::from(buf[3]);
        let flags = buf[4];

        // RFC 9113 Section 4.1: the high bit of the stream id is reserved
        // and must be 0 on receipt.
        if (buf[5] & 0x80) != 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "reserved bit set in frame header",
            ));
        }

        let stream_id = ((buf[5] as u32 & 0x7f) << 24)
            | ((buf[6] as u32) << 16)
            | ((buf[7] as u32) << 8)
            | (buf[8] as u32);

        Ok(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    /// Serialize frame header to bytes.
    pub fn serialize(&self, buf: &mut BytesMut) {
        // Length (24 bits)
        buf.put_u8((self.length >> 16) as u8);
        buf.put_u8((self.length >> 8) as u8);
        buf.put_u8(self.length as u8);
        // Type (8 bits)
        buf.put_u8(self.frame_type.into());
        // Flags (8 bits)
        buf.put_u8(self.flags);
        // Stream ID (31 bits, high bit reserved and must be 0)
        buf.put_u32(self.stream_id & 0x7fff_ffff);
    }
}

/// DATA frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: u32,
    pub data: Bytes,
    pub end_stream: bool,
    pub pad_len: u8,
}

impl DataFrame {
    pub fn new(stream_id: u32, data: Bytes) -> Self {
        Self {
            stream_id,
            data,
            end_stream: false,
            pad_len: 0,
        }
    }

    pub fn end_stream(mut self, end: bool) -> Self {
        self.end_stream = end;
        self
    }

    fn serialize(&self) -> BytesMut {
        let payload_len = if self.pad_len > 0 {
            1 + self.data.len() + self.pad_len as usize
        } else {
            self.data.len()
        };
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);

        let mut frame_flags = if self.end_stream { flags::END_STREAM } else { 0 };
        if self.pad_len > 0 {
            frame_flags |= flags::PADDED;
        }

        FrameHeader {
            length: payload_len as u32,
            frame_type: FrameType::Data,
            flags: frame_flags,
            stream_id: self.stream_id,
        }
        .serialize(&mut buf);

        if self.pad_len > 0 {
            buf.put_u8(self.pad_len);
        }
        buf.extend_from_slice(&self.data);
        if self.pad_len > 0 {
            buf.extend_from_slice(&vec![0u8; self.pad_len as usize]);
        }

        buf
    }

    fn parse(stream_id: u32, frame_flags: u8, mut payload: Bytes) -> Result<Self> {
        let end_stream = (frame_flags & flags::END_STREAM) != 0;
        let padded = (frame_flags & flags::PADDED) != 0;

        let (data, pad_len) = if padded {
            if payload.remaining() < 1 {
                return Err(Error::protocol(
                    ErrorCode::FrameSizeError,
                    "padded DATA frame missing padding length",
                ));
            }
            let pad_len = payload.get_u8() as usize;
            if pad_len > payload.remaining() {
                return Err(Error::protocol(
                    ErrorCode::ProtocolError,
                    "padding length exceeds DATA payload size",
                ));
            }
            let data_len = payload.remaining() - pad_len;
            let data = payload.copy_to_bytes(data_len);
            payload.advance(pad_len);
            (data, pad_len as u8)
        } else {
            (payload, 0)
        };

        Ok(Self {
            stream_id,
            data,
            end_stream,
            pad_len,
        })
    }
}

/// Priority data (optional in a HEADERS frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityData {
    pub exclusive: bool,
    pub stream_dependency: u32,
    pub weight: u8,
}

/// HEADERS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    pub stream_id: u32,
    pub fragment: Bytes,
    pub end_stream: bool,
    pub end_headers: bool,
    pub priority: Option<PriorityData>,
    pub pad_len: u8,
}

impl HeadersFrame {
    pub fn new(stream_id: u32, fragment: Bytes) -> Self {
        Self {
            stream_id,
            fragment,
            end_stream: false,
            end_headers: true,
            priority: None,
            pad_len: 0,
        }
    }

    pub fn end_stream(mut self, end: bool) -> Self {
        self.end_stream = end;
        self
    }

    pub fn end_headers(mut self, end: bool) -> Self {
        self.end_headers = end;
        self
    }

    fn serialize(&self) -> BytesMut {
        let priority_len = if self.priority.is_some() { 5 } else { 0 };
        let pad_extra = if self.pad_len > 0 {
            1 + self.pad_len as usize
        } else {
            0
        };
        let payload_len = priority_len + self.fragment.len() + pad_extra;
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);

        let mut frame_flags = 0u8;
        if self.end_stream {
            frame_flags |= flags::END_STREAM;
        }
        if self.end_headers {
            frame_flags |= flags::END_HEADERS;
        }
        if self.priority.is_some() {
            frame_flags |= flags::PRIORITY;
        }
        if self.pad_len > 0 {
            frame_flags |= flags::PADDED;
        }

        FrameHeader {
            length: payload_len as u32,
            frame_type: FrameType::Headers,
            flags: frame_flags,
            stream_id: self.stream_id,
        }
        .serialize(&mut buf);

        if self.pad_len > 0 {
            buf.put_u8(self.pad_len);
        }
        if let Some(priority) = &self.priority {
            let dep = if priority.exclusive {
                priority.stream_dependency | 0x8000_0000
            } else {
                priority.stream_dependency
            };
            buf.put_u32(dep);
            buf.put_u8(priority.weight);
        }
        buf.extend_from_slice(&self.fragment);
        if self.pad_len > 0 {
            buf.extend_from_slice(&vec![0u8; self.pad_len as usize]);
        }

        buf
    }

    fn parse(stream_id: u32, frame_flags: u8, mut payload: Bytes) -> Result<Self> {
        if stream_id == 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "HEADERS frame on stream 0",
            ));
        }

        let end_stream = (frame_flags & flags::END_STREAM) != 0;
        let end_headers = (frame_flags & flags::END_HEADERS) != 0;
        let padded = (frame_flags & flags::PADDED) != 0;
        let priority_flag = (frame_flags & flags::PRIORITY) != 0;

        let pad_len = if padded {
            if payload.remaining() < 1 {
                return Err(Error::protocol(
                    ErrorCode::FrameSizeError,
                    "padded HEADERS frame missing padding length",
                ));
            }
            payload.get_u8() as usize
        } else {
            0
        };

        let priority = if priority_flag {
            if payload.remaining() < 5 {
                return Err(Error::protocol(
                    ErrorCode::FrameSizeError,
                    "HEADERS frame with PRIORITY flag missing priority data",
                ));
            }
            let dep_raw = payload.get_u32();
            Some(PriorityData {
                exclusive: (dep_raw & 0x8000_0000) != 0,
                stream_dependency: dep_raw & 0x7fff_ffff,
                weight: payload.get_u8(),
            })
        } else {
            None
        };

        if pad_len > payload.remaining() {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "padding length exceeds HEADERS payload size",
            ));
        }
        let fragment = payload.copy_to_bytes(payload.remaining() - pad_len);
        payload.advance(pad_len);

        Ok(Self {
            stream_id,
            fragment,
            end_stream,
            end_headers,
            priority,
            pad_len: pad_len as u8,
        })
    }
}

/// PRIORITY frame (RFC 9113 Section 6.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityFrame {
    pub stream_id: u32,
    pub exclusive: bool,
    pub stream_dependency: u32,
    pub weight: u8,
}

impl PriorityFrame {
    fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 5);

        FrameHeader {
            length: 5,
            frame_type: FrameType::Priority,
            flags: 0,
            stream_id: self.stream_id,
        }
        .serialize(&mut buf);

        let dep = if self.exclusive {
            self.stream_dependency | 0x8000_0000
        } else {
            self.stream_dependency
        };
        buf.put_u32(dep);
        buf.put_u8(self.weight);

        buf
    }

    fn parse(stream_id: u32, mut payload: Bytes) -> Result<Self> {
        if stream_id == 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "PRIORITY frame on stream 0",
            ));
        }
        if payload.remaining() != 5 {
            return Err(Error::protocol(
                ErrorCode::FrameSizeError,
                "PRIORITY frame payload must be 5 bytes",
            ));
        }

        let dep_raw = payload.get_u32();
        let stream_dependency = dep_raw & 0x7fff_ffff;
        // RFC 9113 Section 6.3: a stream cannot depend on itself.
        if stream_dependency == stream_id {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "PRIORITY stream depends on itself",
            ));
        }

        Ok(Self {
            stream_id,
            exclusive: (dep_raw & 0x8000_0000) != 0,
            stream_dependency,
            weight: payload.get_u8(),
        })
    }
}

/// RST_STREAM frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub stream_id: u32,
    pub error_code: ErrorCode,
}

impl RstStreamFrame {
    pub fn new(stream_id: u32, error_code: ErrorCode) -> Self {
        Self {
            stream_id,
            error_code,
        }
    }

    fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);

        FrameHeader {
            length: 4,
            frame_type: FrameType::RstStream,
            flags: 0,
            stream_id: self.stream_id,
        }
        .serialize(&mut buf);
        buf.put_u32(self.error_code.as_u32());

        buf
    }

    fn parse(stream_id: u32, mut payload: Bytes) -> Result<Self> {
        if stream_id == 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "RST_STREAM frame on stream 0",
            ));
        }
        if payload.remaining() != 4 {
            return Err(Error::protocol(
                ErrorCode::FrameSizeError,
                "RST_STREAM frame payload must be 4 bytes",
            ));
        }

        Ok(Self {
            stream_id,
            error_code: ErrorCode::from_u32(payload.get_u32()),
        })
    }
}

/// SETTINGS frame.
///
/// Entries are kept as raw `(id, value)` pairs in wire order; unknown
/// identifiers pass through untouched and are ignored at apply time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    pub entries: Vec<(u16, u32)>,
    pub ack: bool,
}

impl SettingsFrame {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            ack: false,
        }
    }

    /// Create a SETTINGS ACK frame.
    pub fn ack() -> Self {
        Self {
            entries: Vec::new(),
            ack: true,
        }
    }

    /// Add a setting. Order of calls determines wire order.
    pub fn push<T: Into<u16>>(&mut self, id: T, value: u32) -> &mut Self {
        self.entries.push((id.into(), value));
        self
    }

    fn serialize(&self) -> BytesMut {
        let payload_len = if self.ack { 0 } else { self.entries.len() * 6 };
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);

        FrameHeader {
            length: payload_len as u32,
            frame_type: FrameType::Settings,
            flags: if self.ack { flags::ACK } else { 0 },
            stream_id: 0,
        }
        .serialize(&mut buf);

        if !self.ack {
            for (id, value) in &self.entries {
                buf.put_u16(*id);
                buf.put_u32(*value);
            }
        }

        buf
    }

    fn parse(stream_id: u32, frame_flags: u8, mut payload: Bytes) -> Result<Self> {
        if stream_id != 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "SETTINGS frame on a non-zero stream",
            ));
        }
        let ack = (frame_flags & flags::ACK) != 0;
        if ack && !payload.is_empty() {
            return Err(Error::protocol(
                ErrorCode::FrameSizeError,
                "SETTINGS ACK with a payload",
            ));
        }
        if payload.len() % 6 != 0 {
            return Err(Error::protocol(
                ErrorCode::FrameSizeError,
                "SETTINGS payload is not a multiple of 6 bytes",
            ));
        }

        let mut entries = Vec::with_capacity(payload.len() / 6);
        while payload.remaining() >= 6 {
            let id = payload.get_u16();
            let value = payload.get_u32();
            entries.push((id, value));
        }

        Ok(Self { entries, ack })
    }
}

impl Default for SettingsFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// PUSH_PROMISE frame (RFC 9113 Section 6.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromiseFrame {
    pub stream_id: u32,
    pub promised_stream_id: u32,
    pub fragment: Bytes,
    pub end_headers: bool,
    pub pad_len: u8,
}

impl PushPromiseFrame {
    fn serialize(&self) -> BytesMut {
        let pad_extra = if self.pad_len > 0 {
            1 + self.pad_len as usize
        } else {
            0
        };
        let payload_len = 4 + self.fragment.len() + pad_extra;
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);

        let mut frame_flags = if self.end_headers { flags::END_HEADERS } else { 0 };
        if self.pad_len > 0 {
            frame_flags |= flags::PADDED;
        }

        FrameHeader {
            length: payload_len as u32,
            frame_type: FrameType::PushPromise,
            flags: frame_flags,
            stream_id: self.stream_id,
        }
        .serialize(&mut buf);

        if self.pad_len > 0 {
            buf.put_u8(self.pad_len);
        }
        buf.put_u32(self.promised_stream_id & 0x7fff_ffff);
        buf.extend_from_slice(&self.fragment);
        if self.pad_len > 0 {
            buf.extend_from_slice(&vec![0u8; self.pad_len as usize]);
        }

        buf
    }

    fn parse(stream_id: u32, frame_flags: u8, mut payload: Bytes) -> Result<Self> {
        if stream_id == 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "PUSH_PROMISE frame on stream 0",
            ));
        }

        let end_headers = (frame_flags & flags::END_HEADERS) != 0;
        let padded = (frame_flags & flags::PADDED) != 0;

        let pad_len = if padded {
            if payload.remaining() < 1 {
                return Err(Error::protocol(
                    ErrorCode::FrameSizeError,
                    "padded PUSH_PROMISE frame missing padding length",
                ));
            }
            payload.get_u8() as usize
        } else {
            0
        };

        if payload.remaining() < 4 {
            return Err(Error::protocol(
                ErrorCode::FrameSizeError,
                "PUSH_PROMISE frame missing promised stream id",
            ));
        }
        let promised_raw = payload.get_u32();
        if (promised_raw & 0x8000_0000) != 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "reserved bit set in promised stream id",
            ));
        }

        if pad_len > payload.remaining() {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "padding length exceeds PUSH_PROMISE payload size",
            ));
        }
        let fragment = payload.copy_to_bytes(payload.remaining() - pad_len);
        payload.advance(pad_len);

        Ok(Self {
            stream_id,
            promised_stream_id: promised_raw & 0x7fff_ffff,
            fragment,
            end_headers,
            pad_len: pad_len as u8,
        })
    }
}

/// PING frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingFrame {
    pub ack: bool,
    pub payload: [u8; 8],
}

impl PingFrame {
    pub fn new(payload: [u8; 8]) -> Self {
        Self {
            ack: false,
            payload,
        }
    }

    /// Create a PING ACK echoing the opaque payload.
    pub fn ack(payload: [u8; 8]) -> Self {
        Self { ack: true, payload }
    }

    fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);

        FrameHeader {
            length: 8,
            frame_type: FrameType::Ping,
            flags: if self.ack { flags::ACK } else { 0 },
            stream_id: 0,
        }
        .serialize(&mut buf);
        buf.extend_from_slice(&self.payload);

        buf
    }

    fn parse(stream_id: u32, frame_flags: u8, payload: Bytes) -> Result<Self> {
        if stream_id != 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "PING frame on a non-zero stream",
            ));
        }
        if payload.len() != 8 {
            return Err(Error::protocol(
                ErrorCode::FrameSizeError,
                "PING frame payload must be 8 bytes",
            ));
        }
        let mut opaque = [0u8; 8];
        opaque.copy_from_slice(&payload);

        Ok(Self {
            ack: (frame_flags & flags::ACK) != 0,
            payload: opaque,
        })
    }
}

/// GOAWAY frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoAwayFrame {
    pub last_stream_id: u32,
    pub error_code: ErrorCode,
    pub debug_data: Bytes,
}

impl GoAwayFrame {
    pub fn new(last_stream_id: u32, error_code: ErrorCode) -> Self {
        Self {
            last_stream_id,
            error_code,
            debug_data: Bytes::new(),
        }
    }

    fn serialize(&self) -> BytesMut {
        let payload_len = 8 + self.debug_data.len();
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);

        FrameHeader {
            length: payload_len as u32,
            frame_type: FrameType::GoAway,
            flags: 0,
            stream_id: 0,
        }
        .serialize(&mut buf);
        buf.put_u32(self.last_stream_id & 0x7fff_ffff);
        buf.put_u32(self.error_code.as_u32());
        buf.extend_from_slice(&self.debug_data);

        buf
    }

    fn parse(stream_id: u32, mut payload: Bytes) -> Result<Self> {
        if stream_id != 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "GOAWAY frame on a non-zero stream",
            ));
        }
        if payload.remaining() < 8 {
            return Err(Error::protocol(
                ErrorCode::FrameSizeError,
                "GOAWAY frame payload too short",
            ));
        }

        let last_stream_id = payload.get_u32() & 0x7fff_ffff;
        let error_code = ErrorCode::from_u32(payload.get_u32());
        let debug_data = payload.copy_to_bytes(payload.remaining());

        Ok(Self {
            last_stream_id,
            error_code,
            debug_data,
        })
    }
}

/// WINDOW_UPDATE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    pub stream_id: u32,
    pub increment: u32,
}

impl WindowUpdateFrame {
    pub fn new(stream_id: u32, increment: u32) -> Self {
        Self {
            stream_id,
            increment,
        }
    }

    fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);

        FrameHeader {
            length: 4,
            frame_type: FrameType::WindowUpdate,
            flags: 0,
            stream_id: self.stream_id,
        }
        .serialize(&mut buf);
        buf.put_u32(self.increment & 0x7fff_ffff);

        buf
    }

    fn parse(stream_id: u32, mut payload: Bytes) -> Result<Self> {
        if payload.remaining() != 4 {
            return Err(Error::protocol(
                ErrorCode::FrameSizeError,
                "WINDOW_UPDATE frame payload must be 4 bytes",
            ));
        }
        let increment = payload.get_u32() & 0x7fff_ffff;

        // RFC 9113 Section 6.9: an increment of 0 is a flow-control error.
        if increment == 0 {
            return Err(Error::flow_control("WINDOW_UPDATE increment must be non-zero"));
        }

        Ok(Self {
            stream_id,
            increment,
        })
    }
}

/// CONTINUATION frame (RFC 9113 Section 6.10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    pub stream_id: u32,
    pub fragment: Bytes,
    pub end_headers: bool,
}

impl ContinuationFrame {
    pub fn new(stream_id: u32, fragment: Bytes, end_headers: bool) -> Self {
        Self {
            stream_id,
            fragment,
            end_headers,
        }
    }

    fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.fragment.len());

        FrameHeader {
            length: self.fragment.len() as u32,
            frame_type: FrameType::Continuation,
            flags: if self.end_headers { flags::END_HEADERS } else { 0 },
            stream_id: self.stream_id,
        }
        .serialize(&mut buf);
        buf.extend_from_slice(&self.fragment);

        buf
    }

    fn parse(stream_id: u32, frame_flags: u8, payload: Bytes) -> Result<Self> {
        if stream_id == 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "CONTINUATION frame on stream 0",
            ));
        }

        Ok(Self {
            stream_id,
            fragment: payload,
            end_headers: (frame_flags & flags::END_HEADERS) != 0,
        })
    }
}

/// A complete HTTP/2 frame, one variant per frame type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    GoAway(GoAwayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
}

impl Frame {
    /// The stream this frame addresses (0 for connection-scoped frames).
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data(f) => f.stream_id,
            Frame::Headers(f) => f.stream_id,
            Frame::Priority(f) => f.stream_id,
            Frame::RstStream(f) => f.stream_id,
            Frame::Settings(_) | Frame::Ping(_) | Frame::GoAway(_) => 0,
            Frame::PushPromise(f) => f.stream_id,
            Frame::WindowUpdate(f) => f.stream_id,
            Frame::Continuation(f) => f.stream_id,
        }
    }

    fn parse(header: &FrameHeader, payload: Bytes) -> Result<Frame> {
        let sid = header.stream_id;
        Ok(match header.frame_type {
            FrameType::Data => Frame::Data(DataFrame::parse(sid, header.flags, payload)?),
            FrameType::Headers => Frame::Headers(HeadersFrame::parse(sid, header.flags, payload)?),
            FrameType::Priority => Frame::Priority(PriorityFrame::parse(sid, payload)?),
            FrameType::RstStream => Frame::RstStream(RstStreamFrame::parse(sid, payload)?),
            FrameType::Settings => Frame::Settings(SettingsFrame::parse(sid, header.flags, payload)?),
            FrameType::PushPromise => {
                Frame::PushPromise(PushPromiseFrame::parse(sid, header.flags, payload)?)
            }
            FrameType::Ping => Frame::Ping(PingFrame::parse(sid, header.flags, payload)?),
            FrameType::GoAway => Frame::GoAway(GoAwayFrame::parse(sid, payload)?),
            FrameType::WindowUpdate => Frame::WindowUpdate(WindowUpdateFrame::parse(sid, payload)?),
            FrameType::Continuation => {
                Frame::Continuation(ContinuationFrame::parse(sid, header.flags, payload)?)
            }
            FrameType::Unknown(_) => unreachable!("unknown frame types are surfaced as Decoded::Ignored"),
        })
    }

    /// Serialize this frame (header + payload), validating it against the
    /// peer's advertised `max_frame_size` and the frame type's stream-id
    /// requirements.
    pub fn encode(&self, max_frame_size: u32) -> Result<BytesMut> {
        let needs_stream = matches!(
            self,
            Frame::Data(_)
                | Frame::Headers(_)
                | Frame::Priority(_)
                | Frame::RstStream(_)
                | Frame::PushPromise(_)
                | Frame::Continuation(_)
        );
        if needs_stream && self.stream_id() == 0 {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                "stream-scoped frame encoded with stream id 0",
            ));
        }

        let buf = match self {
            Frame::Data(f) => f.serialize(),
            Frame::Headers(f) => f.serialize(),
            Frame::Priority(f) => f.serialize(),
            Frame::RstStream(f) => f.serialize(),
            Frame::Settings(f) => f.serialize(),
            Frame::PushPromise(f) => f.serialize(),
            Frame::Ping(f) => f.serialize(),
            Frame::GoAway(f) => f.serialize(),
            Frame::WindowUpdate(f) => f.serialize(),
            Frame::Continuation(f) => f.serialize(),
        };

        let payload_len = (buf.len() - FRAME_HEADER_SIZE) as u32;
        if payload_len > max_frame_size {
            return Err(Error::protocol(
                ErrorCode::FrameSizeError,
                format!(
                    "frame payload of {} bytes exceeds peer MAX_FRAME_SIZE {}",
                    payload_len, max_frame_size
                ),
            ));
        }

        Ok(buf)
    }
}

/// Outcome of one decoder step.
#[derive(Debug)]
pub enum Decoded {
    Frame(Frame),
    /// An unknown frame type; RFC 9113 Section 4.1 requires it to be
    /// ignored, not rejected.
    Ignored { frame_type: u8, stream_id: u32 },
}

/// Parse one frame out of the accumulator.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame; the
/// caller keeps buffering. On success the consumed bytes are removed from
/// `buf`, so calling in a loop drains every complete frame from a single
/// input buffer.
pub fn decode(buf: &mut BytesMut, max_frame_size: u32) -> Result<Option<Decoded>> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let header = FrameHeader::parse(&buf[..FRAME_HEADER_SIZE])?;

    // RFC 9113 Section 4.2: frames above the advertised limit are a
    // connection error.
    if header.length > max_frame_size {
        return Err(Error::protocol(
            ErrorCode::FrameSizeError,
            format!(
                "frame payload of {} bytes exceeds MAX_FRAME_SIZE {}",
                header.length, max_frame_size
            ),
        ));
    }

    if buf.len() < FRAME_HEADER_SIZE + header.length as usize {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_SIZE);
    let payload = buf.split_to(header.length as usize).freeze();

    if let FrameType::Unknown(raw) = header.frame_type {
        return Ok(Some(Decoded::Ignored {
            frame_type: raw,
            stream_id: header.stream_id,
        }));
    }

    Frame::parse(&header, payload).map(|f| Some(Decoded::Frame(f)))
}
