use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input at byte {at}: need {need}, {rem} remaining")]
    UnexpectedEof { at: usize, need: usize, rem: usize },

    #[error("invalid UTF-8 in string at byte {at}")]
    InvalidUtf8 { at: usize },

    #[error("malformed string length prefix at byte {at}")]
    InvalidLength { at: usize },

    #[error("negative {what} count {count} at byte {at}")]
    NegativeCount {
        what: &'static str,
        count: i64,
        at: usize,
    },

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("invalid value type flags {flags:#04x} at byte {at}")]
    InvalidTypeFlags { flags: u8, at: usize },

    #[error("array of {count} elements does not match shape {rows}x{cols}")]
    CountMismatch { rows: i32, cols: i32, count: i64 },

    #[error("unknown error marker {0:?}")]
    UnknownErrorMarker(String),

    #[error("memoized range values must be materialized before encoding")]
    UnresolvedRange,

    #[error("{what} of {len} does not fit the wire format")]
    Oversized { what: &'static str, len: usize },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("no server is listening at {}", .path.display())]
    ServerNotRunning { path: PathBuf },

    #[error("timed out after {waited:?} waiting for {stage}")]
    Timeout {
        stage: &'static str,
        waited: Duration,
    },

    #[error("segment {} is too small for its header", .path.display())]
    CorruptSegment { path: PathBuf },
}
