//! HTTP/2 settings (RFC 9113 Section 6.5).

use crate::frame::{SettingsId, DEFAULT_MAX_FRAME_SIZE};

/// Initial flow-control window size per RFC 9113.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Default HPACK dynamic table size per RFC 9113.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;

/// An endpoint's effective settings.
///
/// The defaults are the RFC values; they stay in force until a SETTINGS
/// frame from the peer replaces them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Maximum HPACK dynamic table size, in bytes.
    pub header_table_size: u32,
    /// Whether server push is permitted.
    pub enable_push: bool,
    /// Maximum concurrent streams; `None` means the peer declared no limit.
    pub max_concurrent_streams: Option<u32>,
    /// Initial per-stream flow-control window (0 ..= 2^31-1).
    pub initial_window_size: u32,
    /// Largest frame payload the endpoint accepts (2^14 ..= 2^24-1).
    pub max_frame_size: u32,
    /// Advisory limit on a header list's size; `None` means unlimited.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Apply a SETTINGS payload on top of the current values, last write
    /// winning within the payload.
    ///
    /// Values outside their RFC 9113 Section 6.5.2 ranges are skipped (the
    /// lenient path; the strict path would be a connection error) and
    /// unknown identifiers are ignored. Returns the INITIAL_WINDOW_SIZE
    /// delta (`new - old`) for the caller to propagate to per-stream send
    /// windows.
    pub fn apply(&mut self, entries: &[(u16, u32)]) -> i32 {
        let old_window = self.initial_window_size as i32;

        for (id, value) in entries {
            match *id {
                0x1 => self.header_table_size = *value,
                0x2 => self.enable_push = *value != 0,
                0x3 => self.max_concurrent_streams = Some(*value),
                0x4 => {
                    if *value <= i32::MAX as u32 {
                        self.initial_window_size = *value;
                    }
                }
                0x5 => {
                    if (16_384..=16_777_215).contains(value) {
                        self.max_frame_size = *value;
                    }
                }
                0x6 => self.max_header_list_size = Some(*value),
                _ => {} // Unknown settings are ignored per RFC 9113.
            }
        }

        self.initial_window_size as i32 - old_window
    }

    /// The `(id, value)` pairs announcing these settings on the wire.
    ///
    /// Optional settings without a value are left unannounced, which means
    /// the RFC default on the peer's side.
    pub fn to_entries(&self) -> Vec<(u16, u32)> {
        let mut entries = vec![
            (SettingsId::HeaderTableSize.into(), self.header_table_size),
            (
                SettingsId::EnablePush.into(),
                if self.enable_push { 1 } else { 0 },
            ),
            (
                SettingsId::InitialWindowSize.into(),
                self.initial_window_size,
            ),
            (SettingsId::MaxFrameSize.into(), self.max_frame_size),
        ];
        if let Some(max) = self.max_concurrent_streams {
            entries.push((SettingsId::MaxConcurrentStreams.into(), max));
        }
        if let Some(max) = self.max_header_list_size {
            entries.push((SettingsId::MaxHeaderListSize.into(), max));
        }
        entries
    }
}
