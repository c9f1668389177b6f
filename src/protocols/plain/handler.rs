//! Echo service for plain messages.

use super::codec::Message;
use crate::error::ConnError;
use crate::runtime::FrameHandler;
use tracing::info;

/// Returns every message to its sender unchanged.
#[derive(Debug, Clone, Default)]
pub struct EchoService;

impl FrameHandler<Message> for EchoService {
    fn on_frame(&mut self, frame: Message) -> Result<Option<Message>, ConnError> {
        info!(len = frame.body.len(), msg = %frame.body, "Read client message");
        Ok(Some(frame))
    }
}
