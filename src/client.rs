//! Readiness-driven client.
//!
//! Connects, then sends requests one at a time over a single connection,
//! waiting for each response before scheduling the next. Spacing between
//! requests is enforced through the poll timeout, never by sleeping.

use crate::config::{Config, WireFormat};
use crate::error::ConnError;
use crate::protocols::framed::{Body, BodyKind, Frame, FramedCodec, Header, User};
use crate::protocols::plain::{Message, PlainCodec};
use crate::runtime::mio::sync_interest;
use crate::runtime::{Connection, FrameCodec, InterestSet, ReadyEvent};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const CLIENT_TOKEN: Token = Token(0);

/// A single connection to a frame server.
pub struct Client<C: FrameCodec> {
    poll: Poll,
    events: Events,
    conn: Connection<TcpStream, C>,
    interval: Duration,
}

impl<C: FrameCodec> Client<C> {
    /// Connect to `addr` and register the socket for reads.
    pub fn connect(addr: SocketAddr, codec: C, read_chunk: usize) -> io::Result<Self> {
        // Blocking connect keeps the handshake out of the event loop.
        let std_stream = std::net::TcpStream::connect(addr)?;
        std_stream.set_nonblocking(true)?;
        std_stream.set_nodelay(true)?;
        let mut stream = TcpStream::from_std(std_stream);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut stream, CLIENT_TOKEN, Interest::READABLE)?;
        info!(peer = %addr, "Connected");

        Ok(Self {
            poll,
            events: Events::with_capacity(16),
            conn: Connection::new(stream, codec, read_chunk),
            interval: Duration::ZERO,
        })
    }

    /// Delay between receiving a response and sending the next request.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Send requests built by `next_request` one at a time, handing each
    /// response to `on_response`, and return how many were received.
    ///
    /// With no `limit` this runs until the server closes the connection.
    pub fn exchange<F, R>(
        &mut self,
        limit: Option<usize>,
        mut next_request: F,
        mut on_response: R,
    ) -> Result<usize, ConnError>
    where
        F: FnMut(usize) -> C::Frame,
        R: FnMut(C::Frame),
    {
        let finished = |received: usize| limit.is_some_and(|n| received >= n);
        let mut batch = Vec::new();
        let mut sent = 0;
        let mut received = 0;
        let mut next_send = Some(Instant::now());

        while !finished(received) {
            if let Some(at) = next_send {
                if Instant::now() >= at {
                    let request = next_request(sent);
                    self.send(&request)?;
                    sent += 1;
                    next_send = None;
                }
            }

            let timeout = next_send.map(|at| at.saturating_duration_since(Instant::now()));
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let ready: Vec<ReadyEvent> = self.events.iter().map(ReadyEvent::from_mio).collect();
            for event in ready {
                self.dispatch(&event, &mut batch)?;
                if batch.is_empty() {
                    continue;
                }

                for response in batch.drain(..) {
                    received += 1;
                    on_response(response);
                }
                debug!(received, "Response received");
                if sent == received && !finished(received) {
                    next_send = Some(Instant::now() + self.interval);
                }
            }
        }

        Ok(received)
    }

    fn send(&mut self, request: &C::Frame) -> Result<(), ConnError> {
        self.conn.enqueue_write(request)?;
        sync_interest(self.poll.registry(), &mut self.conn, CLIENT_TOKEN)?;
        Ok(())
    }

    fn dispatch(
        &mut self,
        event: &ReadyEvent,
        responses: &mut Vec<C::Frame>,
    ) -> Result<(), ConnError> {
        if event.error {
            let err = self
                .conn
                .stream()
                .take_error()?
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "socket error"));
            return Err(err.into());
        }

        let registered = self.conn.interest();
        if event.ready.contains(InterestSet::READABLE) {
            let mut collect = |frame: C::Frame| -> Result<Option<C::Frame>, ConnError> {
                responses.push(frame);
                Ok(None)
            };
            self.conn.on_readable(&mut collect)?;
        }
        if event.ready.contains(InterestSet::WRITABLE)
            && self.conn.interest().contains(InterestSet::WRITABLE)
        {
            self.conn.on_writable()?;
        }
        if self.conn.interest() != registered {
            sync_interest(self.poll.registry(), &mut self.conn, CLIENT_TOKEN)?;
        }
        Ok(())
    }
}

/// Default request text for the plain protocol.
fn greeting() -> String {
    format!(
        "hello, {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
    )
}

/// Run the client described by `config`, logging every response.
///
/// A `count` of zero keeps sending until the server goes away.
pub fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = config.connect.parse()?;
    let limit = (config.count > 0).then_some(config.count);

    let result = match config.wire {
        WireFormat::Plain => {
            let codec = PlainCodec::new(config.max_frame_size);
            let mut client =
                Client::connect(addr, codec, config.read_chunk)?.with_interval(config.interval);
            let message = config.message.clone();
            client.exchange(
                limit,
                |_| Message::new(message.clone().unwrap_or_else(greeting)),
                |response| info!(msg = %response.body, "Read server response"),
            )
        }
        WireFormat::Framed => {
            let codec = FramedCodec::new(config.max_frame_size);
            let mut client =
                Client::connect(addr, codec, config.read_chunk)?.with_interval(config.interval);
            let request = sample_request(&config.token)?;
            client.exchange(
                limit,
                |_| request.clone(),
                |response| {
                    info!(
                        token = %response.header.token,
                        kind = ?response.header.body_kind,
                        len = response.body.len(),
                        "Read server response"
                    )
                },
            )
        }
    };

    match result {
        Ok(received) => info!(received, "Client finished"),
        Err(e) if e.is_disconnect() => info!("Server closed the connection"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Request carrying a `User` body, as sent by the framed client.
fn sample_request(token: &str) -> Result<Frame, ConnError> {
    let body = Body::User(User::new("zhangsan", 100)).encode()?;
    Ok(Frame::new(Header::new(token, BodyKind::USER), body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::framed::{BodyRegistry, ProtocolService};
    use crate::protocols::plain::EchoService;
    use crate::runtime::mio::{EventLoop, Listener, LoopOptions};
    use std::thread;

    const MAX: usize = 1024 * 1024;

    fn options() -> LoopOptions {
        LoopOptions {
            max_connections: 8,
            batch_size: 64,
            read_chunk: 4096,
            write_high_water: 1024 * 1024,
        }
    }

    #[test]
    fn test_plain_exchange() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut server =
            EventLoop::new(0, listener, PlainCodec::new(MAX), EchoService, options()).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        let join = thread::spawn(move || server.run());

        let mut client = Client::connect(addr, PlainCodec::new(MAX), 4096)
            .unwrap()
            .with_interval(Duration::from_millis(5));
        let mut responses = Vec::new();
        let received = client
            .exchange(
                Some(3),
                |i| Message::new(format!("hello {i}")),
                |r| responses.push(r),
            )
            .unwrap();
        assert_eq!(received, 3);

        assert_eq!(
            responses,
            vec![
                Message::new("hello 0"),
                Message::new("hello 1"),
                Message::new("hello 2"),
            ]
        );

        handle.shutdown().unwrap();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_framed_exchange() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut server = EventLoop::new(
            0,
            listener,
            FramedCodec::new(MAX),
            ProtocolService::default(),
            options(),
        )
        .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        let join = thread::spawn(move || server.run());

        let mut client = Client::connect(addr, FramedCodec::new(MAX), 4096).unwrap();
        let request = sample_request("i am token").unwrap();
        let mut responses = Vec::new();
        client
            .exchange(Some(1), |_| request.clone(), |r| responses.push(r))
            .unwrap();

        let response = &responses[0];
        assert_eq!(response.magic, crate::protocols::framed::codec::MAGIC);
        assert_eq!(response.header.token, "i'am response token");
        assert_eq!(
            BodyRegistry::default()
                .decode(response.header.body_kind, &response.body)
                .unwrap(),
            Body::User(User::new("zhangsan", 32))
        );

        handle.shutdown().unwrap();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_unlimited_runs_until_server_closes() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut server =
            EventLoop::new(0, listener, PlainCodec::new(MAX), EchoService, options()).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        let join = thread::spawn(move || server.run());

        let mut client = Client::connect(addr, PlainCodec::new(MAX), 4096)
            .unwrap()
            .with_interval(Duration::from_millis(10));
        let mut received = 0;
        let err = client
            .exchange(
                None,
                |i| Message::new(format!("tick {i}")),
                |_| {
                    received += 1;
                    if received == 2 {
                        handle.shutdown().unwrap();
                    }
                },
            )
            .unwrap_err();

        assert!(
            matches!(err, ConnError::Disconnected | ConnError::Io(_)),
            "unexpected error: {err}"
        );
        assert!(received >= 2);
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_greeting_format() {
        assert!(greeting().starts_with("hello, "));
    }
}
