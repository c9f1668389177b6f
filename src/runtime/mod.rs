//! Server runtimes.
//!
//! Two interchangeable ways of serving the same codec and handler:
//! - `mio`: single-threaded readiness event loops, one per worker
//! - `threaded`: one tokio task per connection
//!
//! Shared abstractions:
//! - `FrameCodec` / `FrameHandler`: the protocol seam
//! - `Connection`: per-socket read accumulator, write queue, and interest
//! - `InterestSet`: explicit interest/readiness mask

mod connection;
mod interest;
pub mod mio;
mod protocol;
pub mod threaded;

pub use connection::{Connection, DEFAULT_READ_CHUNK, DEFAULT_WRITE_HIGH_WATER};
pub use interest::{InterestSet, ReadyEvent};
pub use protocol::{Decoded, FrameCodec, FrameHandler};

use crate::config::{Config, RuntimeType};
use std::io;

/// Serve `codec` frames with `handler` on the configured runtime.
pub fn serve<C, H>(config: &Config, codec: C, handler: H) -> io::Result<()>
where
    C: FrameCodec,
    H: FrameHandler<C::Frame> + Clone + Send + 'static,
{
    match config.runtime {
        RuntimeType::Mio => mio::run(config, codec, handler),
        RuntimeType::Threaded => threaded::run(config, codec, handler),
    }
}
