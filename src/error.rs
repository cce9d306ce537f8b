//! Error types for the filament crate.

use crate::frame::ErrorCode;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on an HTTP/2 connection.
///
/// Stream-scoped errors ([`Error::Stream`]) close the offending stream and
/// leave the connection up; every other variant is connection-scoped and
/// tears the connection down.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Underlying socket failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer violated HTTP/2 framing.
    #[error("protocol error ({code:?}): {message}")]
    Protocol { code: ErrorCode, message: String },

    /// Window overflow or negative window.
    #[error("flow control error: {0}")]
    FlowControl(String),

    /// Error scoped to a single stream (e.g. the peer reset it).
    #[error("stream {id} closed ({code:?})")]
    Stream { id: u32, code: ErrorCode },

    /// The peer sent GOAWAY; streams above `last_stream_id` were never
    /// processed and are failed back as un-delivered.
    #[error("cancelled by GOAWAY (last processed stream {last_stream_id})")]
    CancelledByGoaway { last_stream_id: u32 },
}

impl Error {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a connection-scoped protocol error.
    pub fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Create a flow-control error.
    pub fn flow_control(message: impl Into<String>) -> Self {
        Self::FlowControl(message.into())
    }

    /// The GOAWAY error code this error maps to on the wire.
    pub fn goaway_code(&self) -> ErrorCode {
        match self {
            Self::Protocol { code, .. } => *code,
            Self::FlowControl(_) => ErrorCode::FlowControlError,
            Self::Stream { code, .. } => *code,
            Self::Transport(_) | Self::CancelledByGoaway { .. } => ErrorCode::InternalError,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
