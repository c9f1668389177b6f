//! Request handling for header-bearing frames.

use super::codec::Frame;
use super::payload::{Body, BodyRegistry};
use crate::error::ConnError;
use crate::runtime::FrameHandler;
use std::sync::Arc;
use tracing::info;

/// Token stamped on every response.
pub const RESPONSE_TOKEN: &str = "i'am response token";

/// Age written into `User` bodies before they are sent back.
const RESPONSE_AGE: u32 = 32;

/// Decodes the body by its kind tag, rewrites it, and answers on the same
/// connection.
#[derive(Debug, Clone)]
pub struct ProtocolService {
    registry: Arc<BodyRegistry>,
}

impl ProtocolService {
    pub fn new(registry: BodyRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

impl Default for ProtocolService {
    fn default() -> Self {
        Self::new(BodyRegistry::default())
    }
}

impl FrameHandler<Frame> for ProtocolService {
    fn on_frame(&mut self, mut frame: Frame) -> Result<Option<Frame>, ConnError> {
        let body = self.registry.decode(frame.header.body_kind, &frame.body)?;
        info!(token = %frame.header.token, body = ?body, "Received frame");

        let body = match body {
            Body::User(mut user) => {
                user.age = RESPONSE_AGE;
                Body::User(user)
            }
            other => other,
        };

        frame.header.token = RESPONSE_TOKEN.to_string();
        frame.header.body_kind = body.kind();
        frame.body = body.encode()?;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::framed::{BodyKind, Header, User};
    use crate::protocols::framed::payload::PayloadError;

    fn request(body: Body) -> Frame {
        Frame::new(
            Header::new("i am token", body.kind()),
            body.encode().unwrap(),
        )
    }

    #[test]
    fn test_user_response() {
        let mut service = ProtocolService::default();
        let reply = service
            .on_frame(request(Body::User(User::new("zhangsan", 100))))
            .unwrap()
            .unwrap();

        assert_eq!(reply.header.token, RESPONSE_TOKEN);
        assert_eq!(reply.header.body_kind, BodyKind::USER);
        let registry = BodyRegistry::default();
        assert_eq!(
            registry.decode(BodyKind::USER, &reply.body).unwrap(),
            Body::User(User::new("zhangsan", 32))
        );
    }

    #[test]
    fn test_text_passes_through() {
        let mut service = ProtocolService::default();
        let reply = service
            .on_frame(request(Body::Text("HELLO, WORLD".into())))
            .unwrap()
            .unwrap();
        assert_eq!(&reply.body[..], b"HELLO, WORLD");
        assert_eq!(reply.header.token, RESPONSE_TOKEN);
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let mut service = ProtocolService::default();
        let frame = Frame::new(Header::new("t", BodyKind(77)), &b"??"[..]);
        let err = service.on_frame(frame).unwrap_err();
        assert!(matches!(
            err,
            ConnError::Payload(PayloadError::UnknownKind(77))
        ));
    }
}
