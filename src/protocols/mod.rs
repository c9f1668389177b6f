//! Wire protocol implementations.
//!
//! The two formats are mutually exclusive; a server or client speaks exactly
//! one of them, chosen by configuration.
//!
//! - `framed`: `[u16 len][u32 magic][u16 header_len][header][body]`
//! - `plain`: `[u32 body_len][UTF-8 body]`

pub mod framed;
pub mod plain;
