//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//! Each worker thread owns one `Poll`, one listener, and every connection
//! that listener accepts.

mod event_loop;
mod listener;

pub use event_loop::run;
pub(crate) use event_loop::sync_interest;

#[cfg(test)]
pub(crate) use event_loop::{EventLoop, LoopOptions};
#[cfg(test)]
pub(crate) use listener::Listener;
