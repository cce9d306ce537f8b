//! Per-stream state.
//!
//! One [`Stream`] record per logical request/response, owned by the
//! connection engine. It tracks the RFC 9113 Section 5.1 state machine
//! (the client-role subset), reassembles header blocks across CONTINUATION
//! frames, accumulates the response, and holds the unsent tail of the
//! request body while flow control has it blocked.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::frame::ErrorCode;

/// HTTP/2 stream states (RFC 9113 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// An assembled response, delivered once the peer half-closes.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct Stream {
    pub id: u32,
    pub state: StreamState,
    /// Credit the peer gave us for DATA on this stream.
    pub send_window: i32,
    /// Credit we gave the peer.
    pub recv_window: i32,
    /// Header-block fragments accumulated across HEADERS/CONTINUATION.
    pub headers_accum: BytesMut,
    /// A header block for this stream is mid-assembly; only CONTINUATION
    /// frames are legal on the connection until it completes.
    pub awaiting_continuation: bool,
    /// END_STREAM arrived on the HEADERS frame that opened the block;
    /// applied once the block completes.
    end_stream_pending: bool,
    /// Response assembly.
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: BytesMut,
    delivered: bool,
    /// Correlation token of the originating request; `None` for streams the
    /// peer pushed.
    pub token: Option<u64>,
    /// Unsent request body tail, kept while windows are exhausted.
    pub pending_body: Bytes,
    pub body_offset: usize,
}

impl Stream {
    /// A locally-initiated stream, created when a request is admitted.
    pub fn local(id: u32, token: u64, send_window: i32, recv_window: i32) -> Self {
        Self::new(id, StreamState::Idle, Some(token), send_window, recv_window)
    }

    /// A stream reserved by a peer PUSH_PROMISE.
    pub fn promised(id: u32, send_window: i32, recv_window: i32) -> Self {
        Self::new(id, StreamState::ReservedRemote, None, send_window, recv_window)
    }

    fn new(
        id: u32,
        state: StreamState,
        token: Option<u64>,
        send_window: i32,
        recv_window: i32,
    ) -> Self {
        Self {
            id,
            state,
            send_window,
            recv_window,
            headers_accum: BytesMut::new(),
            awaiting_continuation: false,
            end_stream_pending: false,
            status: None,
            headers: Vec::new(),
            body: BytesMut::new(),
            delivered: false,
            token,
            pending_body: Bytes::new(),
            body_offset: 0,
        }
    }

    /// Sending HEADERS moves an idle stream to open (or straight to
    /// half-closed local when the request carries END_STREAM).
    pub fn open_local(&mut self, end_stream: bool) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = if end_stream {
            StreamState::HalfClosedLocal
        } else {
            StreamState::Open
        };
    }

    /// We sent END_STREAM on the last DATA frame.
    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// The peer's END_STREAM flag arrived.
    pub fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// RST_STREAM in either direction closes immediately.
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Begin (and possibly finish) header-block assembly from a HEADERS
    /// frame. Returns the complete block when END_HEADERS was set.
    pub fn begin_headers(&mut self, fragment: &[u8], end_headers: bool, end_stream: bool) -> Option<Bytes> {
        // A response on a push-reserved stream half-closes our side.
        if self.state == StreamState::ReservedRemote {
            self.state = StreamState::HalfClosedLocal;
        }
        self.headers_accum.extend_from_slice(fragment);
        self.end_stream_pending = end_stream;
        if end_headers {
            self.awaiting_continuation = false;
            Some(self.headers_accum.split().freeze())
        } else {
            self.awaiting_continuation = true;
            None
        }
    }

    /// Append a CONTINUATION fragment. Returns the complete block when this
    /// fragment carried END_HEADERS.
    pub fn continue_headers(&mut self, fragment: &[u8], end_headers: bool) -> Option<Bytes> {
        self.headers_accum.extend_from_slice(fragment);
        if end_headers {
            self.awaiting_continuation = false;
            Some(self.headers_accum.split().freeze())
        } else {
            None
        }
    }

    /// Record the decoded response header list and apply a pending
    /// END_STREAM. Returns an error when the peer omitted `:status`.
    pub fn store_response_headers(&mut self, decoded: Vec<(String, String)>) -> Result<()> {
        for (name, value) in decoded {
            if name == ":status" {
                let status = value.parse::<u16>().map_err(|_| {
                    Error::protocol(
                        ErrorCode::ProtocolError,
                        format!("invalid :status value {:?}", value),
                    )
                })?;
                self.status = Some(status);
            } else if !name.starts_with(':') {
                self.headers.push((name, value));
            }
        }
        if self.end_stream_pending {
            self.end_stream_pending = false;
            self.recv_end_stream();
        }
        Ok(())
    }

    /// Append a DATA payload to the response body and debit the receive
    /// window.
    pub fn recv_data(&mut self, data: &[u8], end_stream: bool) {
        self.body.extend_from_slice(data);
        self.recv_window -= data.len() as i32;
        if end_stream {
            self.recv_end_stream();
        }
    }

    /// Whether the peer has half-closed and the response has not yet been
    /// handed to the user.
    pub fn response_ready(&self) -> bool {
        !self.delivered
            && matches!(
                self.state,
                StreamState::HalfClosedRemote | StreamState::Closed
            )
    }

    /// Finalize the response for delivery. The stream keeps running if our
    /// sending side is still open.
    pub fn take_response(&mut self) -> Result<Response> {
        self.delivered = true;
        let status = self.status.ok_or_else(|| {
            Error::protocol(
                ErrorCode::ProtocolError,
                format!("stream {} ended without a :status header", self.id),
            )
        })?;
        Ok(Response {
            status,
            headers: std::mem::take(&mut self.headers),
            body: self.body.split().freeze(),
        })
    }

    /// The unsent request body tail.
    pub fn remaining_body(&self) -> &[u8] {
        &self.pending_body[self.body_offset..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_response_walkthrough() {
        let mut stream = Stream::local(1, 7, 65_535, 65_535);
        assert_eq!(stream.state, StreamState::Idle);

        stream.open_local(true); // GET: HEADERS carried END_STREAM
        assert_eq!(stream.state, StreamState::HalfClosedLocal);

        let block = stream.begin_headers(&[0x88], true, false).unwrap();
        assert_eq!(&block[..], &[0x88]);
        stream
            .store_response_headers(vec![(":status".into(), "200".into())])
            .unwrap();

        stream.recv_data(b"hello", true);
        assert_eq!(stream.state, StreamState::Closed);
        assert!(stream.response_ready());

        let response = stream.take_response().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"hello");
        assert_eq!(stream.recv_window, 65_530);
    }

    #[test]
    fn upload_half_closes_after_body() {
        let mut stream = Stream::local(1, 1, 100, 100);
        stream.open_local(false); // body follows
        assert_eq!(stream.state, StreamState::Open);

        stream.send_end_stream();
        assert_eq!(stream.state, StreamState::HalfClosedLocal);

        stream.recv_end_stream();
        assert_eq!(stream.state, StreamState::Closed);
    }

    #[test]
    fn continuation_accumulates_fragments() {
        let mut stream = Stream::local(1, 1, 100, 100);
        stream.open_local(true);

        assert!(stream.begin_headers(&[0x88, 0x40], false, true).is_none());
        assert!(stream.awaiting_continuation);
        assert!(stream.continue_headers(&[0x0a], false).is_none());

        let block = stream.continue_headers(&[0x0b], true).unwrap();
        assert_eq!(&block[..], &[0x88, 0x40, 0x0a, 0x0b]);
        assert!(!stream.awaiting_continuation);

        // The END_STREAM flag from the opening HEADERS applies now.
        stream
            .store_response_headers(vec![(":status".into(), "204".into())])
            .unwrap();
        assert_eq!(stream.state, StreamState::Closed);
    }

    #[test]
    fn promised_stream_half_closes_on_response_headers() {
        let mut stream = Stream::promised(2, 65_535, 65_535);
        assert_eq!(stream.state, StreamState::ReservedRemote);

        stream.begin_headers(&[0x88], true, false);
        assert_eq!(stream.state, StreamState::HalfClosedLocal);
    }

    #[test]
    fn reset_closes_from_any_state() {
        let mut stream = Stream::local(5, 1, 100, 100);
        stream.open_local(false);
        stream.reset();
        assert!(stream.is_closed());
    }

    #[test]
    fn missing_status_is_a_protocol_error() {
        let mut stream = Stream::local(1, 1, 100, 100);
        stream.open_local(true);
        stream.begin_headers(&[0x88], true, true);
        stream
            .store_response_headers(vec![("server".into(), "x".into())])
            .unwrap();
        assert!(stream.response_ready());
        assert!(matches!(
            stream.take_response(),
            Err(Error::Protocol { .. })
        ));
    }
}
