//! Typed frame bodies.
//!
//! The header's `body_kind` tag selects a decoder from a [`BodyRegistry`].
//! Only registered kinds can be decoded; unknown tags are rejected instead of
//! being interpreted speculatively.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Body type tag carried in the frame header.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyKind(pub u16);

impl BodyKind {
    pub const TEXT: BodyKind = BodyKind(1);
    pub const RAW: BodyKind = BodyKind(2);
    pub const USER: BodyKind = BodyKind(3);
}

impl fmt::Debug for BodyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BodyKind::TEXT => f.write_str("Text"),
            BodyKind::RAW => f.write_str("Raw"),
            BodyKind::USER => f.write_str("User"),
            BodyKind(other) => write!(f, "BodyKind({other})"),
        }
    }
}

/// Body decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("no decoder registered for body kind {0}")]
    UnknownKind(u16),

    #[error("body truncated")]
    Truncated,

    #[error("body contains invalid UTF-8")]
    InvalidUtf8,

    #[error("{0} trailing bytes after body")]
    TrailingBytes(usize),

    #[error("body field too long to encode")]
    TooLong,
}

/// Sample record body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub age: u32,
}

impl User {
    pub fn new(name: impl Into<String>, age: u32) -> Self {
        Self {
            name: name.into(),
            age,
        }
    }
}

/// A decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Raw(Bytes),
    User(User),
}

impl Body {
    pub fn kind(&self) -> BodyKind {
        match self {
            Body::Text(_) => BodyKind::TEXT,
            Body::Raw(_) => BodyKind::RAW,
            Body::User(_) => BodyKind::USER,
        }
    }

    /// Serialize the body for the wire.
    pub fn encode(&self) -> Result<Bytes, PayloadError> {
        match self {
            Body::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Body::Raw(bytes) => Ok(bytes.clone()),
            Body::User(user) => {
                if user.name.len() > u16::MAX as usize {
                    return Err(PayloadError::TooLong);
                }
                let mut dst = BytesMut::with_capacity(2 + user.name.len() + 4);
                dst.put_u16(user.name.len() as u16);
                dst.put_slice(user.name.as_bytes());
                dst.put_u32(user.age);
                Ok(dst.freeze())
            }
        }
    }
}

fn decode_text(src: &[u8]) -> Result<Body, PayloadError> {
    let text = std::str::from_utf8(src).map_err(|_| PayloadError::InvalidUtf8)?;
    Ok(Body::Text(text.to_string()))
}

fn decode_raw(src: &[u8]) -> Result<Body, PayloadError> {
    Ok(Body::Raw(Bytes::copy_from_slice(src)))
}

// [u16 name_len][name][u32 age]
fn decode_user(mut src: &[u8]) -> Result<Body, PayloadError> {
    if src.remaining() < 2 {
        return Err(PayloadError::Truncated);
    }
    let name_len = src.get_u16() as usize;
    if src.remaining() < name_len + 4 {
        return Err(PayloadError::Truncated);
    }
    let name = std::str::from_utf8(&src[..name_len])
        .map_err(|_| PayloadError::InvalidUtf8)?
        .to_string();
    src.advance(name_len);
    let age = src.get_u32();
    if src.has_remaining() {
        return Err(PayloadError::TrailingBytes(src.remaining()));
    }
    Ok(Body::User(User { name, age }))
}

/// Decoder for one body kind.
pub type DecodeFn = fn(&[u8]) -> Result<Body, PayloadError>;

/// Lookup table from body kind to decoder.
#[derive(Clone)]
pub struct BodyRegistry {
    decoders: HashMap<BodyKind, DecodeFn>,
}

impl BodyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register or replace the decoder for `kind`.
    pub fn register(&mut self, kind: BodyKind, decode: DecodeFn) -> &mut Self {
        self.decoders.insert(kind, decode);
        self
    }

    #[cfg(test)]
    pub fn contains(&self, kind: BodyKind) -> bool {
        self.decoders.contains_key(&kind)
    }

    pub fn decode(&self, kind: BodyKind, src: &[u8]) -> Result<Body, PayloadError> {
        let decode = self
            .decoders
            .get(&kind)
            .ok_or(PayloadError::UnknownKind(kind.0))?;
        decode(src)
    }
}

impl Default for BodyRegistry {
    /// Registry with the built-in kinds.
    fn default() -> Self {
        let mut registry = Self::new();
        registry
            .register(BodyKind::TEXT, decode_text)
            .register(BodyKind::RAW, decode_raw)
            .register(BodyKind::USER, decode_user);
        registry
    }
}

impl fmt::Debug for BodyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}
