//! Header-bearing frame codec.
//!
//! ```text
//! +-----------+------------+------------+----------------+----------------+
//! | LEN (u16) | MAGIC (u32)| HLEN (u16) | Header         | Body           |
//! |           | 0xABABABAB |            | HLEN bytes     | rest of frame  |
//! +-----------+------------+------------+----------------+----------------+
//! ```
//!
//! All integers are big-endian. `LEN` counts every byte after itself, so the
//! body length is `LEN - 6 - HLEN` and is never transmitted on its own.

use super::payload::BodyKind;
use crate::error::{Corruption, FrameError};
use crate::runtime::{Decoded, FrameCodec};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame sentinel.
pub const MAGIC: u32 = 0xABAB_ABAB;

/// Width of the outer length field.
const LENGTH_FIELD: usize = 2;

/// Magic plus header length, the part of `LEN` that is always present.
const FIXED_PREFIX: usize = 4 + 2;

/// Frame header: credential and the tag telling receivers how to read the body.
///
/// Encoded as `[u16 token_len][token][u16 body_kind]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub token: String,
    pub body_kind: BodyKind,
}

impl Header {
    pub fn new(token: impl Into<String>, body_kind: BodyKind) -> Self {
        Self {
            token: token.into(),
            body_kind,
        }
    }

    pub fn encoded_len(&self) -> usize {
        2 + self.token.len() + 2
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.token.len() as u16);
        dst.put_slice(self.token.as_bytes());
        dst.put_u16(self.body_kind.0);
    }

    /// Parse a header blob. The blob must be consumed exactly.
    fn decode(mut src: &[u8]) -> Result<Self, Corruption> {
        if src.remaining() < 2 {
            return Err(Corruption::MalformedHeader);
        }
        let token_len = src.get_u16() as usize;
        if src.remaining() != token_len + 2 {
            return Err(Corruption::MalformedHeader);
        }
        let token = std::str::from_utf8(&src[..token_len])
            .map_err(|_| Corruption::MalformedHeader)?
            .to_string();
        src.advance(token_len);
        let body_kind = BodyKind(src.get_u16());
        Ok(Self { token, body_kind })
    }
}

/// Application frame with a typed header and an opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub magic: u32,
    pub header: Header,
    pub body: Bytes,
}

impl Frame {
    pub fn new(header: Header, body: impl Into<Bytes>) -> Self {
        Self {
            magic: MAGIC,
            header,
            body: body.into(),
        }
    }

    /// Bytes counted by the length field.
    pub fn total_len(&self) -> usize {
        FIXED_PREFIX + self.header.encoded_len() + self.body.len()
    }
}

/// Codec for [`Frame`].
#[derive(Debug, Clone)]
pub struct FramedCodec {
    max_frame_size: usize,
}

impl FramedCodec {
    /// The effective cap never exceeds what the u16 length field can carry.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u16::MAX as usize),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl FrameCodec for FramedCodec {
    type Frame = Frame;

    fn encode(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        if frame.magic != MAGIC {
            return Err(Corruption::BadMagic { found: frame.magic }.into());
        }

        let header_len = frame.header.encoded_len();
        let total = frame.total_len();
        if total > self.max_frame_size {
            return Err(FrameError::Oversized {
                declared: total,
                max: self.max_frame_size,
            });
        }

        dst.reserve(LENGTH_FIELD + total);
        dst.put_u16(total as u16);
        dst.put_u32(frame.magic);
        dst.put_u16(header_len as u16);
        frame.header.encode(dst);
        dst.put_slice(&frame.body);
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<Decoded<Frame>, FrameError> {
        if src.len() < LENGTH_FIELD {
            return Ok(Decoded::Incomplete);
        }
        let total = u16::from_be_bytes([src[0], src[1]]) as usize;
        if total > self.max_frame_size {
            return Err(FrameError::Oversized {
                declared: total,
                max: self.max_frame_size,
            });
        }
        if total < FIXED_PREFIX {
            return Err(Corruption::Truncated { declared: total }.into());
        }

        // Check the sentinel as soon as it is buffered so a desynchronized
        // stream is dropped without waiting for a bogus length to fill.
        if src.len() >= LENGTH_FIELD + 4 {
            let magic = u32::from_be_bytes([src[2], src[3], src[4], src[5]]);
            if magic != MAGIC {
                return Err(Corruption::BadMagic { found: magic }.into());
            }
        }

        let frame_end = LENGTH_FIELD + total;
        if src.len() < frame_end {
            return Ok(Decoded::Incomplete);
        }

        let mut frame = &src[LENGTH_FIELD..frame_end];
        let magic = frame.get_u32();
        let header_len = frame.get_u16() as usize;
        if header_len > frame.remaining() {
            return Err(Corruption::HeaderOverrun {
                header_len,
                frame_len: total,
            }
            .into());
        }

        let header = Header::decode(&frame[..header_len])?;
        frame.advance(header_len);
        let body = Bytes::copy_from_slice(frame);

        Ok(Decoded::Frame {
            frame: Frame {
                magic,
                header,
                body,
            },
            consumed: frame_end,
        })
    }
}
