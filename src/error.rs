//! Error types shared by the codecs and the runtimes.
//!
//! Every variant here is fatal to a single connection only. The event loop
//! closes the offending socket and keeps serving everyone else.

use crate::protocols::framed::payload::PayloadError;
use std::io;
use thiserror::Error;

/// Reason a frame was judged corrupt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
    /// Magic sentinel did not match; the stream is desynchronized.
    #[error("bad magic {found:#010x}")]
    BadMagic { found: u32 },

    /// Declared total length is smaller than the fixed prefix.
    #[error("declared length {declared} is shorter than the fixed prefix")]
    Truncated { declared: usize },

    /// Header length points past the end of the frame.
    #[error("header length {header_len} overruns frame of {frame_len} bytes")]
    HeaderOverrun { header_len: usize, frame_len: usize },

    /// Header blob could not be parsed.
    #[error("malformed header")]
    MalformedHeader,

    /// Text body is not valid UTF-8.
    #[error("body is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("corrupt frame: {0}")]
    Corrupt(#[from] Corruption),

    /// Declared or encoded length exceeds the configured cap.
    #[error("frame of {declared} bytes exceeds maximum {max}")]
    Oversized { declared: usize, max: usize },
}

/// Errors that terminate a connection.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Orderly close by the peer (zero-byte read).
    #[error("peer disconnected")]
    Disconnected,
}

impl ConnError {
    /// Whether this error is an ordinary end of conversation.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnError::Disconnected => true,
            ConnError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
