//! Protocol seam between the runtimes and the wire formats.
//!
//! Runtimes know nothing about frame layouts. They hand accumulated bytes to
//! a [`FrameCodec`] and pass each decoded frame to a [`FrameHandler`], which
//! may answer with a response frame.

use crate::error::{ConnError, FrameError};
use bytes::{Bytes, BytesMut};

/// Result of attempting to decode one frame from the front of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded<F> {
    /// A complete frame, and how many bytes of input it occupied.
    Frame { frame: F, consumed: usize },
    /// Not enough bytes buffered yet.
    Incomplete,
}

/// A length-prefixed wire format.
///
/// `decode` must be resumable: given a growing prefix of the same stream it
/// returns `Incomplete` until the whole frame is present and never reads past
/// the bytes it reports as consumed.
pub trait FrameCodec: Clone + Send + Sync + 'static {
    type Frame: Send + 'static;

    /// Append the encoded frame to `dst`.
    fn encode(&self, frame: &Self::Frame, dst: &mut BytesMut) -> Result<(), FrameError>;

    /// Decode one frame from the start of `src`.
    fn decode(&self, src: &[u8]) -> Result<Decoded<Self::Frame>, FrameError>;

    /// Encode a frame into its own buffer.
    fn encode_to_bytes(&self, frame: &Self::Frame) -> Result<Bytes, FrameError> {
        let mut dst = BytesMut::new();
        self.encode(frame, &mut dst)?;
        Ok(dst.freeze())
    }
}

/// Business callback invoked once per decoded frame.
///
/// Returning `Ok(Some(frame))` queues a response on the same connection.
/// Returning an error closes the connection.
pub trait FrameHandler<F> {
    fn on_frame(&mut self, frame: F) -> Result<Option<F>, ConnError>;
}

impl<F, T> FrameHandler<F> for T
where
    T: FnMut(F) -> Result<Option<F>, ConnError>,
{
    fn on_frame(&mut self, frame: F) -> Result<Option<F>, ConnError> {
        self(frame)
    }
}
