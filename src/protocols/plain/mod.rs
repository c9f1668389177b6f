//! Plain text protocol.
//!
//! Each message is a 4-byte big-endian body length followed by that many
//! bytes of UTF-8 text:
//!
//! ```text
//! Request:  \x00\x00\x00\x05hello
//! Response: \x00\x00\x00\x05hello
//! ```
//!
//! The server echoes every message back as-is.

pub mod codec;
pub mod handler;

pub use codec::{Message, PlainCodec};
pub use handler::EchoService;
