//! Body-only frame codec.
//!
//! ```text
//! +----------------+------------------------+
//! | BODY LEN (u32) | Body (UTF-8)           |
//! +----------------+------------------------+
//! ```
//!
//! Big-endian length; the prefix counts the body only.

use crate::error::{Corruption, FrameError};
use crate::runtime::{Decoded, FrameCodec};
use bytes::{BufMut, BytesMut};

const LENGTH_FIELD: usize = 4;

/// A text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: String,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

/// Codec for [`Message`].
#[derive(Debug, Clone)]
pub struct PlainCodec {
    max_frame_size: usize,
}

impl PlainCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as usize),
        }
    }
}

impl FrameCodec for PlainCodec {
    type Frame = Message;

    fn encode(&self, frame: &Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = frame.body.len();
        if len > self.max_frame_size {
            return Err(FrameError::Oversized {
                declared: len,
                max: self.max_frame_size,
            });
        }
        dst.reserve(LENGTH_FIELD + len);
        dst.put_u32(len as u32);
        dst.put_slice(frame.body.as_bytes());
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<Decoded<Message>, FrameError> {
        if src.len() < LENGTH_FIELD {
            return Ok(Decoded::Incomplete);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_size {
            return Err(FrameError::Oversized {
                declared: len,
                max: self.max_frame_size,
            });
        }

        let end = LENGTH_FIELD + len;
        if src.len() < end {
            return Ok(Decoded::Incomplete);
        }

        let body = std::str::from_utf8(&src[LENGTH_FIELD..end])
            .map_err(|_| Corruption::InvalidUtf8)?
            .to_string();
        Ok(Decoded::Frame {
            frame: Message { body },
            consumed: end,
        })
    }
}
