//! Connection-level flow control and stream admission.
//!
//! One [`FlowControl`] record per connection tracks the effective peer
//! settings, the send/receive windows, the odd stream-id allocator, the set
//! of active streams, and the queue of requests deferred until budget is
//! available.

use std::collections::{HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::queue::Request;
use crate::settings::{Settings, DEFAULT_INITIAL_WINDOW_SIZE};

/// Largest legal flow-control window (2^31 - 1).
pub const MAX_WINDOW_SIZE: i32 = 0x7fff_ffff;

/// Admission demand granted when the peer declares no concurrency limit.
/// A finite proxy for "effectively unbounded".
pub const UNLIMITED_DEMAND: u32 = 2_000_000_000;

#[derive(Debug)]
pub struct FlowControl {
    /// Effective peer settings (RFC defaults until the first SETTINGS).
    settings: Settings,
    /// Next locally-initiated stream id; odd, strictly increasing.
    next_stream_id: u32,
    /// Streams currently open or half-closed from our perspective.
    active_streams: HashSet<u32>,
    /// Requests deferred until admission budget and windows allow.
    pending: VecDeque<Request>,
    /// Connection-level send window (credit the peer gave us).
    pub connection_send_window: i32,
    /// Connection-level receive window (credit we gave the peer).
    pub connection_recv_window: i32,
}

impl FlowControl {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            next_stream_id: 1,
            active_streams: HashSet::new(),
            pending: VecDeque::new(),
            connection_send_window: DEFAULT_INITIAL_WINDOW_SIZE as i32,
            connection_recv_window: DEFAULT_INITIAL_WINDOW_SIZE as i32,
        }
    }

    /// The effective peer settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the effective settings with the diffed result of a SETTINGS
    /// payload; an empty payload resets to the RFC defaults.
    ///
    /// Returns the INITIAL_WINDOW_SIZE delta the caller must propagate to
    /// every active stream's send window.
    pub fn update_settings(&mut self, entries: &[(u16, u32)]) -> i32 {
        if entries.is_empty() {
            let old_window = self.settings.initial_window_size as i32;
            self.settings = Settings::default();
            return self.settings.initial_window_size as i32 - old_window;
        }
        self.settings.apply(entries)
    }

    /// Allocate the next locally-initiated stream id. Ids are odd and never
    /// reused.
    pub fn allocate_stream_id(&mut self) -> u32 {
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        id
    }

    /// The highest locally-initiated stream id handed out so far (0 if
    /// none), as advertised in a locally-sent GOAWAY.
    pub fn last_allocated_stream_id(&self) -> u32 {
        self.next_stream_id.saturating_sub(2)
    }

    /// Append a request to the deferred queue.
    pub fn add(&mut self, request: Request) {
        self.pending.push_back(request);
    }

    /// Take the next deferred request, if any.
    pub fn pop_pending(&mut self) -> Option<Request> {
        self.pending.pop_front()
    }

    /// Drain every deferred request (teardown paths).
    pub fn drain_pending(&mut self) -> Vec<Request> {
        self.pending.drain(..).collect()
    }

    pub fn add_active(&mut self, stream_id: u32) {
        self.active_streams.insert(stream_id);
    }

    pub fn remove_active(&mut self, stream_id: u32) {
        self.active_streams.remove(&stream_id);
    }

    pub fn is_active(&self, stream_id: u32) -> bool {
        self.active_streams.contains(&stream_id)
    }

    pub fn active_stream_count(&self) -> u32 {
        self.active_streams.len() as u32
    }

    /// Credit the connection send window from a WINDOW_UPDATE.
    ///
    /// Fails when the window would exceed 2^31-1 (RFC 9113 Section 6.9.1).
    pub fn increment_window(&mut self, delta: u32) -> Result<()> {
        let updated = self.connection_send_window as i64 + delta as i64;
        if updated > MAX_WINDOW_SIZE as i64 {
            return Err(Error::flow_control(format!(
                "connection send window {} exceeds 2^31-1",
                updated
            )));
        }
        self.connection_send_window = updated as i32;
        Ok(())
    }

    /// Debit the connection send window for outbound DATA.
    pub fn consume_send_window(&mut self, amount: i32) {
        self.connection_send_window -= amount;
    }

    /// The admission demand target: remaining stream slots under the peer's
    /// concurrency limit, or [`UNLIMITED_DEMAND`] when it declared none.
    pub fn demand(&self) -> u32 {
        match self.settings.max_concurrent_streams {
            Some(max) => max.saturating_sub(self.active_stream_count()),
            None => UNLIMITED_DEMAND,
        }
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new()
    }
}
