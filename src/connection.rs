//! HTTP/2 connection engine.
//!
//! One engine task per connection owns all connection state: the transport,
//! the byte accumulator, the effective peer settings, the flow-control
//! record, the stream map, and the HPACK worker pair. The task `select!`s
//! over socket reads, control commands, and the admission queue; no other
//! task touches connection state, so none of it is locked.
//!
//! Inbound bytes drain through the frame codec and each frame is dispatched
//! in wire order, either to the connection itself (SETTINGS, PING, GOAWAY,
//! stream-0 WINDOW_UPDATE) or to the addressed stream. Outbound requests are
//! pulled from the queue under the admission budget, assigned odd stream
//! ids, and written as HEADERS (+ CONTINUATIONs) and flow-controlled DATA.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{Method, Uri};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing;

use crate::error::{Error, Result};
use crate::flow_control::{FlowControl, MAX_WINDOW_SIZE};
use crate::frame::{
    self, ContinuationFrame, DataFrame, Decoded, ErrorCode, Frame, GoAwayFrame, HeadersFrame,
    PingFrame, PushPromiseFrame, RstStreamFrame, SettingsFrame, WindowUpdateFrame,
    CONNECTION_PREFACE,
};
use crate::hpack::{HpackDecoder, HpackEncoder};
use crate::queue::{self, QueueHandle, Request, Subscription};
use crate::settings::{Settings, DEFAULT_INITIAL_WINDOW_SIZE};
use crate::stream::{Response, Stream};

/// Increment announced on stream 0 once the peer acknowledges our SETTINGS,
/// raising the connection receive window from its default to the 2^31-1
/// protocol ceiling for bulk downloads.
pub const BULK_WINDOW_INCREMENT: u32 = 0x7fff_ffff - DEFAULT_INITIAL_WINDOW_SIZE;

const READ_CHUNK_SIZE: usize = 16_384;

/// Connection configuration: the settings announced in the client's first
/// SETTINGS frame.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub settings: Settings,
}

/// Control calls from the handle to the engine.
#[derive(Debug)]
enum Command {
    Ping,
    Close,
}

/// Notifications delivered to the connection's user.
#[derive(Debug)]
pub enum Event {
    /// A request completed; `token` is the value returned by
    /// [`Handle::request`].
    Response { token: u64, response: Response },
    /// A request failed without a response.
    RequestFailed { token: u64, error: Error },
    /// The peer pushed a stream; the headers are the promised request's.
    PushPromise {
        stream_id: u32,
        headers: Vec<(String, String)>,
    },
    /// A pushed stream completed.
    PushResponse { stream_id: u32, response: Response },
    /// The peer sent us a PING (already echoed).
    Ping,
    /// The peer acknowledged a locally-sent PING.
    Pong,
    /// The connection is gone; `error` is `None` for orderly shutdown.
    Closed { error: Option<Error> },
}

/// Receiver for connection [`Event`]s.
pub type Events = mpsc::UnboundedReceiver<Event>;

/// Cheap, cloneable user-side handle to a connection.
#[derive(Clone)]
pub struct Handle {
    queue: QueueHandle,
    commands: mpsc::UnboundedSender<Command>,
    next_token: Arc<AtomicU64>,
}

impl Handle {
    /// Enqueue a request. Returns the correlation token echoed in the
    /// matching [`Event::Response`] / [`Event::RequestFailed`].
    ///
    /// The request waits in the queue until the admission budget (the
    /// peer's MAX_CONCURRENT_STREAMS minus active streams) admits it.
    pub fn request(
        &self,
        method: Method,
        uri: Uri,
        headers: Vec<(String, String)>,
        body: Bytes,
    ) -> Result<u64> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.queue.push(Request {
            token,
            method,
            uri,
            headers,
            body,
        })?;
        Ok(token)
    }

    /// Send a PING; the peer's acknowledgement surfaces as [`Event::Pong`].
    pub fn ping(&self) -> Result<()> {
        self.commands
            .send(Command::Ping)
            .map_err(|_| Error::transport("connection engine is gone"))
    }

    /// Orderly shutdown: GOAWAY(NO_ERROR), fail in-flight requests, stop.
    pub fn close(&self) -> Result<()> {
        self.commands
            .send(Command::Close)
            .map_err(|_| Error::transport("connection engine is gone"))
    }
}

/// Where the header block currently being assembled belongs.
enum HeaderDest {
    /// Response headers for a live stream; fragments accumulate in the
    /// stream record.
    Response(u32),
    /// Request headers promised for a pushed stream.
    Promise {
        promised: u32,
        accum: BytesMut,
        refused: bool,
    },
    /// Headers for a stream we no longer track; decoded for HPACK state,
    /// then discarded.
    Orphan { accum: BytesMut },
}

/// An in-flight header block. While one exists, the only legal frame on the
/// connection is a CONTINUATION for `wire_stream`.
struct HeaderAssembly {
    wire_stream: u32,
    dest: HeaderDest,
}

/// The per-connection engine.
pub struct Connection<S> {
    transport: S,
    read_buf: BytesMut,
    local: Settings,
    flow: FlowControl,
    streams: HashMap<u32, Stream>,
    encoder: HpackEncoder,
    decoder: HpackDecoder,
    events: mpsc::UnboundedSender<Event>,
    commands: mpsc::UnboundedReceiver<Command>,
    queue: Subscription,
    /// Admission demand granted to the queue and not yet consumed.
    outstanding_demand: u64,
    assembly: Option<HeaderAssembly>,
    /// Last stream id the peer promised to process, once GOAWAY arrived.
    goaway: Option<u32>,
    bulk_window_announced: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Open an HTTP/2 connection over an established transport.
    ///
    /// Sends the 24-octet client preface immediately followed by our
    /// SETTINGS in a single write, subscribes to the request queue with
    /// initial demand 0, and spawns the engine task.
    pub async fn open(mut transport: S, config: Config) -> Result<(Handle, Events)> {
        let mut settings_frame = SettingsFrame::new();
        for (id, value) in config.settings.to_entries() {
            settings_frame.push(id, value);
        }
        let settings_bytes = Frame::Settings(settings_frame).encode(frame::DEFAULT_MAX_FRAME_SIZE)?;

        // One write for the whole handshake flight.
        let mut handshake = BytesMut::with_capacity(CONNECTION_PREFACE.len() + settings_bytes.len());
        handshake.extend_from_slice(CONNECTION_PREFACE);
        handshake.extend_from_slice(&settings_bytes);
        transport.write_all(&handshake).await?;
        transport.flush().await?;

        let (queue_handle, subscription) = queue::subscription();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut decoder = HpackDecoder::new();
        decoder.update_max_table_size(config.settings.header_table_size as usize);

        let connection = Self {
            transport,
            read_buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            local: config.settings,
            flow: FlowControl::new(),
            streams: HashMap::new(),
            encoder: HpackEncoder::new(),
            decoder,
            events: event_tx,
            commands: command_rx,
            queue: subscription,
            outstanding_demand: 0,
            assembly: None,
            goaway: None,
            bulk_window_announced: false,
        };
        tokio::spawn(connection.run());

        Ok((
            Handle {
                queue: queue_handle,
                commands: command_tx,
                next_token: Arc::new(AtomicU64::new(1)),
            },
            event_rx,
        ))
    }

    async fn run(mut self) {
        match self.drive().await {
            Ok(()) => {}
            Err(error) => {
                for (_, stream) in self.streams.drain() {
                    if let Some(token) = stream.token {
                        let _ = self.events.send(Event::RequestFailed {
                            token,
                            error: error.clone(),
                        });
                    }
                }
                for request in self.flow.drain_pending() {
                    let _ = self.events.send(Event::RequestFailed {
                        token: request.token,
                        error: error.clone(),
                    });
                }
                let _ = self.events.send(Event::Closed { error: Some(error) });
            }
        }
    }

    async fn drive(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            tokio::select! {
                read = self.transport.read(&mut chunk) => {
                    let n = read?;
                    if n == 0 {
                        // Transport-level disconnect: same teardown as
                        // close(), skipping GOAWAY.
                        return Err(Error::transport("connection closed by peer"));
                    }
                    self.on_bytes(&chunk[..n]).await?;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Ping) => self.send_ping().await?,
                    Some(Command::Close) | None => return self.shutdown().await,
                },
                batch = self.queue.recv() => {
                    if let Some(requests) = batch {
                        self.outstanding_demand =
                            self.outstanding_demand.saturating_sub(requests.len() as u64);
                        for request in requests {
                            self.admit(request);
                        }
                        self.pump_sends().await?;
                    }
                }
            }

            // After GOAWAY the surviving streams run to completion; once
            // none remain the connection terminates normally.
            if self.goaway.is_some() && self.streams.is_empty() {
                let _ = self.events.send(Event::Closed { error: None });
                return Ok(());
            }
        }
    }

    /// Append inbound bytes to the accumulator and dispatch every complete
    /// frame, in wire order.
    async fn on_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.read_buf.extend_from_slice(data);
        loop {
            // Inbound frames are bounded by our own advertised limit.
            let decoded = match frame::decode(&mut self.read_buf, self.local.max_frame_size) {
                Ok(decoded) => decoded,
                Err(error) => return self.fail_connection(error).await,
            };
            match decoded {
                None => return Ok(()),
                Some(Decoded::Ignored {
                    frame_type,
                    stream_id,
                }) => {
                    if self.assembly.is_some() {
                        return self
                            .fail_connection(Error::protocol(
                                ErrorCode::ProtocolError,
                                "frame interleaved in a header block",
                            ))
                            .await;
                    }
                    tracing::debug!(frame_type, stream_id, "ignoring unknown frame type");
                }
                Some(Decoded::Frame(frame)) => self.dispatch(frame).await?,
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<()> {
        // While a header block is in flight, only its CONTINUATIONs are
        // legal on the entire connection.
        if let Some(assembly) = &self.assembly {
            let legal = matches!(&frame, Frame::Continuation(c) if c.stream_id == assembly.wire_stream);
            if !legal {
                return self
                    .fail_connection(Error::protocol(
                        ErrorCode::ProtocolError,
                        "frame interleaved in a header block",
                    ))
                    .await;
            }
        }

        match frame {
            Frame::Settings(f) => self.on_settings(f).await,
            Frame::Ping(f) => self.on_ping(f).await,
            Frame::GoAway(f) => self.on_goaway(f),
            Frame::WindowUpdate(f) => self.on_window_update(f).await,
            Frame::Data(f) => self.on_data(f).await,
            Frame::Headers(f) => self.on_headers(f).await,
            Frame::Continuation(f) => self.on_continuation(f).await,
            Frame::RstStream(f) => self.on_rst_stream(f),
            Frame::PushPromise(f) => self.on_push_promise(f).await,
            Frame::Priority(f) => {
                // Observed but not acted on.
                tracing::debug!(
                    stream_id = f.stream_id,
                    depends_on = f.stream_dependency,
                    weight = f.weight,
                    "ignoring PRIORITY frame"
                );
                Ok(())
            }
        }
    }

    async fn on_settings(&mut self, f: SettingsFrame) -> Result<()> {
        if f.ack {
            // The peer accepted our SETTINGS: announce the bulk-download
            // connection receive window. Announced once; the window now sits
            // at the ceiling, so repeating the increment would overflow the
            // peer's model of it.
            if !self.bulk_window_announced {
                self.bulk_window_announced = true;
                self.write_frame(Frame::WindowUpdate(WindowUpdateFrame::new(
                    0,
                    BULK_WINDOW_INCREMENT,
                )))
                .await?;
                self.flow.connection_recv_window += BULK_WINDOW_INCREMENT as i32;
            }
            return Ok(());
        }

        let delta = self.flow.update_settings(&f.entries);
        self.encoder
            .update_max_table_size(self.flow.settings().header_table_size as usize);

        // RFC 9113 Section 6.9.2: an INITIAL_WINDOW_SIZE change moves every
        // active stream's send window by the delta.
        if delta != 0 {
            for stream in self.streams.values_mut() {
                stream.send_window = stream.send_window.saturating_add(delta);
            }
        }

        self.write_frame(Frame::Settings(SettingsFrame::ack())).await?;
        self.refresh_demand();
        self.pump_sends().await
    }

    async fn on_ping(&mut self, f: PingFrame) -> Result<()> {
        if f.ack {
            let _ = self.events.send(Event::Pong);
        } else {
            let _ = self.events.send(Event::Ping);
            self.write_frame(Frame::Ping(PingFrame::ack(f.payload))).await?;
        }
        Ok(())
    }

    fn on_goaway(&mut self, f: GoAwayFrame) -> Result<()> {
        tracing::warn!(
            last_stream_id = f.last_stream_id,
            error_code = ?f.error_code,
            debug_data = %String::from_utf8_lossy(&f.debug_data),
            "peer sent GOAWAY"
        );
        self.goaway = Some(f.last_stream_id);

        // Streams above last_stream_id were never processed by the peer.
        let cancelled = Error::CancelledByGoaway {
            last_stream_id: f.last_stream_id,
        };
        let abandoned: Vec<u32> = self
            .streams
            .keys()
            .copied()
            .filter(|id| *id > f.last_stream_id)
            .collect();
        for id in abandoned {
            if let Some(stream) = self.streams.remove(&id) {
                self.flow.remove_active(id);
                if let Some(token) = stream.token {
                    let _ = self.events.send(Event::RequestFailed {
                        token,
                        error: cancelled.clone(),
                    });
                }
            }
        }
        for request in self.flow.drain_pending() {
            let _ = self.events.send(Event::RequestFailed {
                token: request.token,
                error: cancelled.clone(),
            });
        }
        Ok(())
    }

    async fn on_window_update(&mut self, f: WindowUpdateFrame) -> Result<()> {
        if f.stream_id == 0 {
            if let Err(error) = self.flow.increment_window(f.increment) {
                return self.fail_connection(error).await;
            }
        } else {
            let overflow = match self.streams.get_mut(&f.stream_id) {
                Some(stream) => {
                    let updated = stream.send_window as i64 + f.increment as i64;
                    if updated > MAX_WINDOW_SIZE as i64 {
                        true
                    } else {
                        stream.send_window = updated as i32;
                        false
                    }
                }
                None => {
                    tracing::debug!(
                        stream_id = f.stream_id,
                        "WINDOW_UPDATE for unknown stream, dropping"
                    );
                    false
                }
            };
            if overflow {
                return self
                    .fail_connection(Error::flow_control(format!(
                        "stream {} send window exceeds 2^31-1",
                        f.stream_id
                    )))
                    .await;
            }
        }

        // Fresh credit may unblock queued bodies.
        self.pump_sends().await
    }

    async fn on_data(&mut self, f: DataFrame) -> Result<()> {
        if f.stream_id == 0 {
            // The lenient path would log and drop; closing with
            // PROTOCOL_ERROR is the correct RFC 9113 behavior.
            return self
                .fail_connection(Error::protocol(
                    ErrorCode::ProtocolError,
                    "DATA frame on stream 0",
                ))
                .await;
        }

        let len = f.data.len() as i32;
        self.flow.connection_recv_window -= len;

        let known = match self.streams.get_mut(&f.stream_id) {
            Some(stream) => {
                stream.recv_data(&f.data, f.end_stream);
                true
            }
            None => false,
        };
        if !known {
            // Late frame for a stream we already tore down.
            tracing::debug!(stream_id = f.stream_id, "DATA for unknown stream, dropping");
            if len > 0 {
                self.write_frame(Frame::WindowUpdate(WindowUpdateFrame::new(0, len as u32)))
                    .await?;
                self.flow.connection_recv_window += len;
            }
            return Ok(());
        }

        // Reflow policy: replenish both windows by the payload length right
        // away, keeping receive windows at their initial values. Zero-length
        // DATA moves no credit.
        if len > 0 {
            let mut updates = BytesMut::new();
            updates.extend_from_slice(
                &Frame::WindowUpdate(WindowUpdateFrame::new(f.stream_id, len as u32))
                    .encode(self.flow.settings().max_frame_size)?,
            );
            updates.extend_from_slice(
                &Frame::WindowUpdate(WindowUpdateFrame::new(0, len as u32))
                    .encode(self.flow.settings().max_frame_size)?,
            );
            self.transport.write_all(&updates).await?;
            self.transport.flush().await?;

            if let Some(stream) = self.streams.get_mut(&f.stream_id) {
                stream.recv_window += len;
            }
            self.flow.connection_recv_window += len;
        }

        self.deliver_if_ready(f.stream_id)
    }

    async fn on_headers(&mut self, f: HeadersFrame) -> Result<()> {
        match self.streams.get_mut(&f.stream_id) {
            Some(stream) => {
                match stream.begin_headers(&f.fragment, f.end_headers, f.end_stream) {
                    Some(block) => self.complete_response_block(f.stream_id, block).await,
                    None => {
                        self.assembly = Some(HeaderAssembly {
                            wire_stream: f.stream_id,
                            dest: HeaderDest::Response(f.stream_id),
                        });
                        Ok(())
                    }
                }
            }
            None => {
                // Late headers still pass through the HPACK decoder so its
                // dynamic table stays synchronized.
                tracing::debug!(stream_id = f.stream_id, "HEADERS for unknown stream, dropping");
                if f.end_headers {
                    self.decode_discard(&f.fragment).await
                } else {
                    let mut accum = BytesMut::new();
                    accum.extend_from_slice(&f.fragment);
                    self.assembly = Some(HeaderAssembly {
                        wire_stream: f.stream_id,
                        dest: HeaderDest::Orphan { accum },
                    });
                    Ok(())
                }
            }
        }
    }

    async fn on_continuation(&mut self, f: ContinuationFrame) -> Result<()> {
        let Some(mut assembly) = self.assembly.take() else {
            return self
                .fail_connection(Error::protocol(
                    ErrorCode::ProtocolError,
                    "CONTINUATION without a preceding HEADERS",
                ))
                .await;
        };

        match &mut assembly.dest {
            HeaderDest::Response(stream_id) => {
                let stream_id = *stream_id;
                let block = self
                    .streams
                    .get_mut(&stream_id)
                    .and_then(|stream| stream.continue_headers(&f.fragment, f.end_headers));
                match block {
                    Some(block) => return self.complete_response_block(stream_id, block).await,
                    None if f.end_headers => return Ok(()), // stream vanished mid-block
                    None => {}
                }
            }
            HeaderDest::Promise {
                promised,
                accum,
                refused,
            } => {
                accum.extend_from_slice(&f.fragment);
                if f.end_headers {
                    let promised = *promised;
                    let refused = *refused;
                    let block = accum.split().freeze();
                    return self.complete_promise_block(promised, refused, block).await;
                }
            }
            HeaderDest::Orphan { accum } => {
                accum.extend_from_slice(&f.fragment);
                if f.end_headers {
                    let block = accum.split().freeze();
                    return self.decode_discard(&block).await;
                }
            }
        }

        self.assembly = Some(assembly);
        Ok(())
    }

    fn on_rst_stream(&mut self, f: RstStreamFrame) -> Result<()> {
        match self.streams.get_mut(&f.stream_id) {
            Some(stream) => {
                stream.reset();
                if let Some(token) = stream.token {
                    let _ = self.events.send(Event::RequestFailed {
                        token,
                        error: Error::Stream {
                            id: f.stream_id,
                            code: f.error_code,
                        },
                    });
                }
                self.finish_stream(f.stream_id);
            }
            None => {
                // Resets for streams we never started carry no state.
                tracing::debug!(
                    stream_id = f.stream_id,
                    error_code = ?f.error_code,
                    "RST_STREAM for unknown stream, dropping"
                );
            }
        }
        Ok(())
    }

    async fn on_push_promise(&mut self, f: PushPromiseFrame) -> Result<()> {
        if f.promised_stream_id == 0 || f.promised_stream_id % 2 != 0 {
            return self
                .fail_connection(Error::protocol(
                    ErrorCode::ProtocolError,
                    format!("promised stream id {} is not even", f.promised_stream_id),
                ))
                .await;
        }

        let refused = !self.local.enable_push;
        if !refused {
            let stream = Stream::promised(
                f.promised_stream_id,
                self.flow.settings().initial_window_size as i32,
                self.local.initial_window_size as i32,
            );
            self.streams.insert(f.promised_stream_id, stream);
            self.flow.add_active(f.promised_stream_id);
        }

        if f.end_headers {
            self.complete_promise_block(f.promised_stream_id, refused, f.fragment)
                .await
        } else {
            let mut accum = BytesMut::new();
            accum.extend_from_slice(&f.fragment);
            self.assembly = Some(HeaderAssembly {
                wire_stream: f.stream_id,
                dest: HeaderDest::Promise {
                    promised: f.promised_stream_id,
                    accum,
                    refused,
                },
            });
            Ok(())
        }
    }

    /// Decode a completed response header block and hand the stream its
    /// header list.
    async fn complete_response_block(&mut self, stream_id: u32, block: Bytes) -> Result<()> {
        let decoded = match self.decoder.decode(&block) {
            Ok(decoded) => decoded,
            Err(error) => return self.fail_connection(error).await,
        };
        if let Err(error) = validate_response_headers(&decoded) {
            return self.fail_connection(error).await;
        }

        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if let Err(error) = stream.store_response_headers(decoded) {
                return self.fail_connection(error).await;
            }
        }
        self.deliver_if_ready(stream_id)
    }

    /// Decode a completed PUSH_PROMISE header block: surface the promise,
    /// or reset the promised stream when push is disabled.
    async fn complete_promise_block(
        &mut self,
        promised: u32,
        refused: bool,
        block: Bytes,
    ) -> Result<()> {
        let decoded = match self.decoder.decode(&block) {
            Ok(decoded) => decoded,
            Err(error) => return self.fail_connection(error).await,
        };

        if refused {
            self.write_frame(Frame::RstStream(RstStreamFrame::new(
                promised,
                ErrorCode::RefusedStream,
            )))
            .await?;
            return Ok(());
        }

        let _ = self.events.send(Event::PushPromise {
            stream_id: promised,
            headers: decoded,
        });
        Ok(())
    }

    /// Decode and discard a header block addressed to a stream we no longer
    /// track, keeping the HPACK dynamic table synchronized.
    async fn decode_discard(&mut self, block: &[u8]) -> Result<()> {
        if let Err(error) = self.decoder.decode(block) {
            return self.fail_connection(error).await;
        }
        Ok(())
    }

    /// Hand a finished response to the user and retire the stream once both
    /// sides are done.
    fn deliver_if_ready(&mut self, stream_id: u32) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };

        if stream.response_ready() {
            let token = stream.token;
            match stream.take_response() {
                Ok(response) => {
                    let event = match token {
                        Some(token) => Event::Response { token, response },
                        None => Event::PushResponse {
                            stream_id,
                            response,
                        },
                    };
                    let _ = self.events.send(event);
                }
                Err(error) => {
                    if let Some(token) = token {
                        let _ = self.events.send(Event::RequestFailed {
                            token,
                            error: error.clone(),
                        });
                    }
                    tracing::warn!(stream_id, %error, "response discarded");
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        stream.reset();
                    }
                }
            }
        }

        if self
            .streams
            .get(&stream_id)
            .map(Stream::is_closed)
            .unwrap_or(false)
        {
            self.finish_stream(stream_id);
        }
        Ok(())
    }

    /// Retire a closed stream: drop the record, shrink the active set, and
    /// grant one admission slot back to the queue.
    fn finish_stream(&mut self, stream_id: u32) {
        self.streams.remove(&stream_id);
        self.flow.remove_active(stream_id);
        if self.goaway.is_none() {
            self.queue.ask(1);
            self.outstanding_demand += 1;
        }
    }

    /// Raise outstanding admission demand to the SETTINGS-derived target.
    /// Demand is a pull protocol and cannot be retracted, so a lowered
    /// target simply stops further grants.
    fn refresh_demand(&mut self) {
        let target = self.flow.demand() as u64;
        if target > self.outstanding_demand {
            let grant = (target - self.outstanding_demand) as u32;
            self.queue.ask(grant);
            self.outstanding_demand = target;
        }
    }

    fn admit(&mut self, request: Request) {
        if let Some(last_stream_id) = self.goaway {
            let _ = self.events.send(Event::RequestFailed {
                token: request.token,
                error: Error::CancelledByGoaway { last_stream_id },
            });
            return;
        }
        self.flow.add(request);
    }

    /// Start every deferred request and push queued bodies as far as the
    /// windows allow.
    async fn pump_sends(&mut self) -> Result<()> {
        while let Some(request) = self.flow.pop_pending() {
            self.start_request(request).await?;
        }
        self.flush_bodies().await
    }

    /// Allocate a stream and write the request's HEADERS (split into
    /// CONTINUATIONs when the encoded block exceeds the peer's frame size).
    async fn start_request(&mut self, request: Request) -> Result<()> {
        let stream_id = self.flow.allocate_stream_id();
        let end_stream = request.body.is_empty();

        let block = match self
            .encoder
            .encode_request(&request.method, &request.uri, &request.headers)
        {
            Ok(block) => block,
            Err(error) => {
                // A request we cannot encode fails alone; the connection
                // stays up.
                let _ = self.events.send(Event::RequestFailed {
                    token: request.token,
                    error,
                });
                return Ok(());
            }
        };

        let mut stream = Stream::local(
            stream_id,
            request.token,
            self.flow.settings().initial_window_size as i32,
            self.local.initial_window_size as i32,
        );
        stream.open_local(end_stream);
        stream.pending_body = request.body;
        self.flow.add_active(stream_id);
        self.streams.insert(stream_id, stream);

        let max_frame_size = self.flow.settings().max_frame_size;
        let mut buf = BytesMut::new();
        if block.len() <= max_frame_size as usize {
            buf.extend_from_slice(
                &Frame::Headers(
                    HeadersFrame::new(stream_id, block)
                        .end_stream(end_stream)
                        .end_headers(true),
                )
                .encode(max_frame_size)?,
            );
        } else {
            let chunks: Vec<Bytes> = block
                .chunks(max_frame_size as usize)
                .map(Bytes::copy_from_slice)
                .collect();
            let last = chunks.len() - 1;

            buf.extend_from_slice(
                &Frame::Headers(
                    HeadersFrame::new(stream_id, chunks[0].clone())
                        .end_stream(end_stream)
                        .end_headers(false),
                )
                .encode(max_frame_size)?,
            );
            for (idx, chunk) in chunks.into_iter().enumerate().skip(1) {
                buf.extend_from_slice(
                    &Frame::Continuation(ContinuationFrame::new(stream_id, chunk, idx == last))
                        .encode(max_frame_size)?,
                );
            }
        }

        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Write DATA for every stream with a queued body, each frame bounded
    /// by min(peer max_frame_size, stream window, connection window). A
    /// stream whose windows are exhausted keeps its tail until the next
    /// WINDOW_UPDATE re-triggers this drain.
    async fn flush_bodies(&mut self) -> Result<()> {
        let mut stream_ids: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| !s.remaining_body().is_empty())
            .map(|(id, _)| *id)
            .collect();
        stream_ids.sort_unstable();

        for stream_id in stream_ids {
            loop {
                let max_frame_size = self.flow.settings().max_frame_size as i32;
                let Some(stream) = self.streams.get_mut(&stream_id) else {
                    break;
                };
                let remaining = stream.remaining_body().len() as i32;
                if remaining == 0 {
                    break;
                }

                let allowed = self
                    .flow
                    .connection_send_window
                    .min(stream.send_window)
                    .min(max_frame_size);
                if allowed <= 0 {
                    break;
                }

                let take = remaining.min(allowed) as usize;
                let offset = stream.body_offset;
                let chunk = stream.pending_body.slice(offset..offset + take);
                let is_last = take == remaining as usize;

                stream.body_offset += take;
                stream.send_window -= take as i32;
                self.flow.consume_send_window(take as i32);
                if is_last {
                    stream.send_end_stream();
                }

                let data = Frame::Data(DataFrame::new(stream_id, chunk).end_stream(is_last))
                    .encode(max_frame_size as u32)?;
                self.transport.write_all(&data).await?;
                self.transport.flush().await?;

                if is_last {
                    // The response may have fully arrived while the body
                    // was still blocked on flow control.
                    self.deliver_if_ready(stream_id)?;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<()> {
        let mut payload = [0u8; 8];
        getrandom::fill(&mut payload)
            .map_err(|e| Error::transport(format!("failed to generate ping payload: {}", e)))?;
        self.write_frame(Frame::Ping(PingFrame::new(payload))).await
    }

    /// Orderly local shutdown: GOAWAY(NO_ERROR), fail in-flight requests,
    /// notify closure.
    async fn shutdown(&mut self) -> Result<()> {
        let goaway = Frame::GoAway(GoAwayFrame::new(
            self.flow.last_allocated_stream_id(),
            ErrorCode::NoError,
        ));
        if let Err(error) = self.write_frame(goaway).await {
            tracing::warn!(%error, "failed to send GOAWAY during shutdown");
        }

        for (id, stream) in self.streams.drain() {
            if let Some(token) = stream.token {
                let _ = self.events.send(Event::RequestFailed {
                    token,
                    error: Error::Stream {
                        id,
                        code: ErrorCode::Cancel,
                    },
                });
            }
        }
        for request in self.flow.drain_pending() {
            let _ = self.events.send(Event::RequestFailed {
                token: request.token,
                error: Error::Stream {
                    id: 0,
                    code: ErrorCode::Cancel,
                },
            });
        }

        let _ = self.events.send(Event::Closed { error: None });
        Ok(())
    }

    /// Escalate a connection-scoped error: best-effort GOAWAY with the
    /// mapped code, then propagate the error to tear the engine down.
    async fn fail_connection(&mut self, error: Error) -> Result<()> {
        let goaway = Frame::GoAway(GoAwayFrame::new(
            self.flow.last_allocated_stream_id(),
            error.goaway_code(),
        ));
        match goaway.encode(self.flow.settings().max_frame_size) {
            Ok(bytes) => {
                if let Err(write_error) = self.transport.write_all(&bytes).await {
                    tracing::warn!(%write_error, "failed to send GOAWAY");
                } else if let Err(flush_error) = self.transport.flush().await {
                    tracing::warn!(%flush_error, "failed to flush GOAWAY");
                }
            }
            Err(encode_error) => {
                tracing::warn!(%encode_error, "failed to encode GOAWAY");
            }
        }
        Err(error)
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        let bytes = frame.encode(self.flow.settings().max_frame_size)?;
        self.transport.write_all(&bytes).await?;
        self.transport.flush().await?;
        Ok(())
    }
}

/// Validate a response header list per RFC 9113 Section 8.3: `:status`
/// must be present and well-formed, request pseudo-headers and
/// connection-specific headers must not appear.
fn validate_response_headers(headers: &[(String, String)]) -> Result<()> {
    let mut has_status = false;

    for (name, value) in headers {
        if let Some(rest) = name.strip_prefix(':') {
            match rest {
                "status" => {
                    if has_status {
                        return Err(Error::protocol(
                            ErrorCode::ProtocolError,
                            "duplicate :status pseudo-header",
                        ));
                    }
                    has_status = true;
                    if value.len() != 3 || !value.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(Error::protocol(
                            ErrorCode::ProtocolError,
                            format!("invalid :status value {:?}", value),
                        ));
                    }
                }
                _ => {
                    return Err(Error::protocol(
                        ErrorCode::ProtocolError,
                        format!("pseudo-header {:?} not allowed in a response", name),
                    ));
                }
            }
        } else {
            let lower = name.to_lowercase();
            if matches!(
                lower.as_str(),
                "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding" | "upgrade"
            ) {
                return Err(Error::protocol(
                    ErrorCode::ProtocolError,
                    format!("connection-specific header {:?} in a response", name),
                ));
            }
        }
    }

    if !has_status {
        return Err(Error::protocol(
            ErrorCode::ProtocolError,
            "response is missing the :status pseudo-header",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_header_validation() {
        let ok = vec![
            (":status".to_string(), "200".to_string()),
            ("server".to_string(), "filament".to_string()),
        ];
        assert!(validate_response_headers(&ok).is_ok());

        let missing = vec![("server".to_string(), "filament".to_string())];
        assert!(validate_response_headers(&missing).is_err());

        let bad_status = vec![(":status".to_string(), "2x0".to_string())];
        assert!(validate_response_headers(&bad_status).is_err());

        let request_pseudo = vec![
            (":status".to_string(), "200".to_string()),
            (":method".to_string(), "GET".to_string()),
        ];
        assert!(validate_response_headers(&request_pseudo).is_err());

        let conn_header = vec![
            (":status".to_string(), "200".to_string()),
            ("connection".to_string(), "close".to_string()),
        ];
        assert!(validate_response_headers(&conn_header).is_err());
    }
}
