//! Interest and readiness masks.
//!
//! mio cannot express an empty interest, and it folds "acceptable" into
//! "readable". Connections therefore keep their own mask and the event loop
//! translates it at registration time.

use bitflags::bitflags;
use mio::event::Event;
use mio::{Interest, Token};

bitflags! {
    /// Subset of {readable, writable, acceptable}.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterestSet: u8 {
        const READABLE = 0b001;
        const WRITABLE = 0b010;
        const ACCEPTABLE = 0b100;
    }
}

impl InterestSet {
    /// Translate to a mio interest, or `None` when nothing is wanted.
    pub fn to_mio(self) -> Option<Interest> {
        let read = self.intersects(InterestSet::READABLE | InterestSet::ACCEPTABLE);
        let write = self.contains(InterestSet::WRITABLE);
        match (read, write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// A readiness notification copied out of a poll call.
///
/// Lives for one loop iteration only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub token: Token,
    pub ready: InterestSet,
    /// Socket reported an error condition.
    pub error: bool,
}

impl ReadyEvent {
    pub fn from_mio(event: &Event) -> Self {
        let mut ready = InterestSet::empty();
        // A closed read half still needs a read to observe EOF.
        if event.is_readable() || event.is_read_closed() {
            ready |= InterestSet::READABLE;
        }
        if event.is_writable() {
            ready |= InterestSet::WRITABLE;
        }
        Self {
            token: event.token(),
            ready,
            error: event.is_error(),
        }
    }
}
