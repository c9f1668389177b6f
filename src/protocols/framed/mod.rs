//! Header-bearing binary protocol.
//!
//! Frames carry a magic sentinel, a length-prefixed header holding a token
//! and a body type tag, and a body whose length is implied by the outer
//! length field. See [`codec`] for the byte layout and [`payload`] for the
//! body kinds.
//!
//! The server answers each frame with the same frame, its token replaced and
//! `User` bodies aged to 32.

pub mod codec;
pub mod handler;
pub mod payload;

pub use codec::{Frame, FramedCodec, Header};
pub use handler::ProtocolService;
pub use payload::{Body, BodyKind, BodyRegistry, User};
