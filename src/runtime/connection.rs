//! Per-connection state for the readiness runtime.
//!
//! A connection owns its stream, a read accumulator holding bytes that do not
//! yet form a complete frame, a queue of fully encoded outbound frames, and
//! the interest mask the event loop should register for it.
//!
//! The stream is any `Read + Write`, so the same logic runs against mio
//! sockets and in-memory streams.

use crate::error::ConnError;
use crate::runtime::interest::InterestSet;
use crate::runtime::protocol::{Decoded, FrameCodec, FrameHandler};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Default size of a single read.
pub const DEFAULT_READ_CHUNK: usize = 16 * 1024;

/// Default queued-response size at which reading pauses.
pub const DEFAULT_WRITE_HIGH_WATER: usize = 1024 * 1024;

/// A single client connection.
pub struct Connection<S, C: FrameCodec> {
    stream: S,
    codec: C,
    /// Bytes received but not yet consumed by the codec.
    read_buf: BytesMut,
    /// Encoded frames awaiting flush, oldest first.
    write_queue: VecDeque<Bytes>,
    /// Bytes of the front frame already written.
    written: usize,
    /// Total size of the frames in `write_queue`.
    queued: usize,
    /// Reading pauses while `queued` is at or above this.
    write_high_water: usize,
    interest: InterestSet,
    read_chunk: usize,
}

impl<S, C> Connection<S, C>
where
    S: Read + Write,
    C: FrameCodec,
{
    /// Create a connection interested in reads only.
    pub fn new(stream: S, codec: C, read_chunk: usize) -> Self {
        Self {
            stream,
            codec,
            read_buf: BytesMut::with_capacity(read_chunk),
            write_queue: VecDeque::new(),
            written: 0,
            queued: 0,
            write_high_water: DEFAULT_WRITE_HIGH_WATER,
            interest: InterestSet::READABLE,
            read_chunk: read_chunk.max(1),
        }
    }

    /// Pause reading once this many response bytes are waiting to be sent.
    pub fn with_write_high_water(mut self, bytes: usize) -> Self {
        self.write_high_water = bytes.max(1);
        self
    }

    /// Current interest mask.
    pub fn interest(&self) -> InterestSet {
        self.interest
    }

    /// Number of frames not yet fully written.
    #[cfg(test)]
    pub fn pending_writes(&self) -> usize {
        self.write_queue.len()
    }

    /// Bytes buffered toward the next inbound frame.
    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Read everything the socket has, dispatching each complete frame.
    ///
    /// Returns the number of frames handed to `handler`. A zero-byte read
    /// yields `Disconnected` after the frames already received are
    /// dispatched. While the write queue is over its high-water mark,
    /// readable interest is dropped and nothing more is read.
    pub fn on_readable<H>(&mut self, handler: &mut H) -> Result<usize, ConnError>
    where
        H: FrameHandler<C::Frame>,
    {
        let mut dispatched = 0;

        loop {
            if self.queued >= self.write_high_water {
                self.interest.remove(InterestSet::READABLE);
                return Ok(dispatched);
            }

            let start = self.read_buf.len();
            self.read_buf.resize(start + self.read_chunk, 0);

            match self.stream.read(&mut self.read_buf[start..]) {
                Ok(0) => {
                    self.read_buf.truncate(start);
                    return Err(ConnError::Disconnected);
                }
                Ok(n) => {
                    self.read_buf.truncate(start + n);
                    dispatched += self.drain_frames(handler)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.read_buf.truncate(start);
                    return Ok(dispatched);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.read_buf.truncate(start);
                }
                Err(e) => {
                    self.read_buf.truncate(start);
                    return Err(e.into());
                }
            }
        }
    }

    /// Decode and dispatch frames until the buffer holds only a partial one.
    fn drain_frames<H>(&mut self, handler: &mut H) -> Result<usize, ConnError>
    where
        H: FrameHandler<C::Frame>,
    {
        let mut count = 0;
        while let Decoded::Frame { frame, consumed } = self.codec.decode(&self.read_buf)? {
            self.read_buf.advance(consumed);
            count += 1;
            if let Some(response) = handler.on_frame(frame)? {
                self.enqueue_write(&response)?;
            }
        }
        Ok(count)
    }

    /// Flush queued frames until the queue empties or the socket would block.
    ///
    /// Writable interest is dropped once nothing is left to write.
    pub fn on_writable(&mut self) -> Result<(), ConnError> {
        while let Some(front) = self.write_queue.front() {
            match self.stream.write(&front[self.written..]) {
                Ok(0) => {
                    let err = io::Error::new(io::ErrorKind::WriteZero, "write returned 0");
                    return Err(err.into());
                }
                Ok(n) => {
                    self.written += n;
                    if self.written == front.len() {
                        self.queued -= front.len();
                        self.write_queue.pop_front();
                        self.written = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.resume_reading();
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.stream.flush()?;
        self.interest.remove(InterestSet::WRITABLE);
        self.resume_reading();
        Ok(())
    }

    fn resume_reading(&mut self) {
        if self.queued < self.write_high_water {
            self.interest.insert(InterestSet::READABLE);
        }
    }

    /// Encode `frame` onto the write queue and ask for writable readiness.
    pub fn enqueue_write(&mut self, frame: &C::Frame) -> Result<(), ConnError> {
        let bytes = self.codec.encode_to_bytes(frame)?;
        self.queued += bytes.len();
        self.write_queue.push_back(bytes);
        self.interest.insert(InterestSet::WRITABLE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use crate::protocols::plain::{Message, PlainCodec};

    /// In-memory stream with scripted reads and a per-turn write budget.
    #[derive(Default)]
    struct MockStream {
        /// Each entry is returned by one `read` call; `None` means WouldBlock.
        pub reads: VecDeque<Option<Vec<u8>>>,
        pub written: Vec<u8>,
        /// Bytes accepted per `write` call.
        pub max_write: usize,
        /// Remaining bytes accepted before `write` reports WouldBlock.
        pub write_budget: usize,
    }

    impl MockStream {
        pub fn with_reads(chunks: &[&[u8]]) -> Self {
            Self {
                reads: chunks.iter().map(|c| Some(c.to_vec())).collect(),
                max_write: usize::MAX,
                write_budget: usize::MAX,
                ..Default::default()
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Some(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.reads.push_front(Some(chunk.split_off(n)));
                    }
                    Ok(n)
                }
                Some(None) | None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.write_budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.max_write).min(self.write_budget);
            self.written.extend_from_slice(&buf[..n]);
            self.write_budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Stream that reports end of file on the first read.
    struct Closed;

    impl Read for Closed {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn codec() -> PlainCodec {
        PlainCodec::new(1024 * 1024)
    }

    fn encoded(body: &str) -> Vec<u8> {
        codec().encode_to_bytes(&Message::new(body)).unwrap().to_vec()
    }

    #[test]
    fn test_pipelined_frames_one_event() {
        let mut both = encoded("first");
        both.extend_from_slice(&encoded("second"));
        let mut conn = Connection::new(MockStream::with_reads(&[&both]), codec(), 4096);

        let mut seen = Vec::new();
        let mut handler = |msg: Message| -> Result<Option<Message>, ConnError> {
            seen.push(msg.body);
            Ok(None)
        };
        let dispatched = conn.on_readable(&mut handler).unwrap();

        assert_eq!(dispatched, 2);
        assert_eq!(seen, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(conn.buffered(), 0);
        assert_eq!(conn.interest(), InterestSet::READABLE);
    }

    #[test]
    fn test_partial_frame_across_events() {
        let bytes = encoded("hello");
        let mut stream = MockStream::with_reads(&[&bytes[..3]]);
        stream.reads.push_back(None);
        stream.reads.push_back(Some(bytes[3..].to_vec()));
        let mut conn = Connection::new(stream, codec(), 4096);

        let mut count = 0;
        let mut handler = |_msg: Message| -> Result<Option<Message>, ConnError> {
            count += 1;
            Ok(None)
        };

        assert_eq!(conn.on_readable(&mut handler).unwrap(), 0);
        assert_eq!(conn.buffered(), 3);
        assert_eq!(conn.on_readable(&mut handler).unwrap(), 1);
        assert_eq!(conn.buffered(), 0);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_small_read_chunks() {
        let bytes = encoded("chunked delivery");
        let mut conn = Connection::new(MockStream::with_reads(&[&bytes]), codec(), 3);

        let mut seen = Vec::new();
        let mut handler = |msg: Message| -> Result<Option<Message>, ConnError> {
            seen.push(msg);
            Ok(None)
        };
        assert_eq!(conn.on_readable(&mut handler).unwrap(), 1);
        assert_eq!(seen, vec![Message::new("chunked delivery")]);
    }

    #[test]
    fn test_response_registers_writable() {
        let bytes = encoded("hello");
        let mut conn = Connection::new(MockStream::with_reads(&[&bytes]), codec(), 4096);

        let mut echo = |msg: Message| -> Result<Option<Message>, ConnError> { Ok(Some(msg)) };
        conn.on_readable(&mut echo).unwrap();

        assert!(conn.interest().contains(InterestSet::WRITABLE));
        assert_eq!(conn.pending_writes(), 1);

        conn.on_writable().unwrap();
        assert_eq!(conn.stream().written, bytes);
        assert_eq!(conn.interest(), InterestSet::READABLE);
        assert_eq!(conn.pending_writes(), 0);
    }

    #[test]
    fn test_short_writes_drain_in_order() {
        let mut stream = MockStream::with_reads(&[]);
        stream.max_write = 3;
        let mut conn = Connection::new(stream, codec(), 4096);

        let bodies = ["alpha", "bravo", "charlie", "delta"];
        let mut expected = Vec::new();
        for body in bodies {
            conn.enqueue_write(&Message::new(body)).unwrap();
            expected.extend_from_slice(&encoded(body));
        }
        assert_eq!(conn.pending_writes(), bodies.len());

        let mut turns = 0;
        while conn.interest().contains(InterestSet::WRITABLE) {
            // Each readiness event lets only 5 bytes through.
            conn.stream_mut().write_budget = 5;
            conn.on_writable().unwrap();
            turns += 1;
            assert!(turns < 100, "write queue never drained");
        }

        assert_eq!(conn.stream().written, expected);
        assert_eq!(conn.pending_writes(), 0);
        assert_eq!(turns, expected.len().div_ceil(5));
    }

    #[test]
    fn test_writable_interest_cleared_until_next_enqueue() {
        let mut conn = Connection::new(MockStream::with_reads(&[]), codec(), 4096);
        conn.enqueue_write(&Message::new("one")).unwrap();
        conn.on_writable().unwrap();
        assert!(!conn.interest().contains(InterestSet::WRITABLE));

        // Spurious writable readiness with nothing queued writes nothing.
        let before = conn.stream().written.len();
        conn.on_writable().unwrap();
        assert_eq!(conn.stream().written.len(), before);
        assert!(!conn.interest().contains(InterestSet::WRITABLE));

        conn.enqueue_write(&Message::new("two")).unwrap();
        assert!(conn.interest().contains(InterestSet::WRITABLE));
    }

    #[test]
    fn test_would_block_keeps_writable() {
        let mut stream = MockStream::with_reads(&[]);
        stream.write_budget = 0;
        let mut conn = Connection::new(stream, codec(), 4096);
        conn.enqueue_write(&Message::new("stuck")).unwrap();

        conn.on_writable().unwrap();
        assert!(conn.interest().contains(InterestSet::WRITABLE));
        assert_eq!(conn.pending_writes(), 1);
    }

    #[test]
    fn test_reading_pauses_over_high_water() {
        let first = encoded("hello");
        let second = encoded("again");
        let stream = MockStream::with_reads(&[&first, &second]);
        let mut conn = Connection::new(stream, codec(), 4096).with_write_high_water(first.len());

        let mut echo = |msg: Message| -> Result<Option<Message>, ConnError> { Ok(Some(msg)) };
        assert_eq!(conn.on_readable(&mut echo).unwrap(), 1);

        // The second frame stays in the socket until the reply is flushed.
        assert_eq!(conn.interest(), InterestSet::WRITABLE);
        assert_eq!(conn.stream().reads.len(), 1);
        assert_eq!(conn.on_readable(&mut echo).unwrap(), 0);

        conn.on_writable().unwrap();
        assert_eq!(conn.interest(), InterestSet::READABLE);
        assert_eq!(conn.stream().written, first);

        assert_eq!(conn.on_readable(&mut echo).unwrap(), 1);
        assert_eq!(conn.stream().reads.len(), 0);
    }

    #[test]
    fn test_peer_close_after_frame() {
        let bytes = encoded("bye");
        let mut stream = MockStream::with_reads(&[&bytes]);
        stream.reads.push_back(Some(Vec::new()));
        let mut conn = Connection::new(stream, codec(), 4096);

        let mut seen = 0;
        let mut handler = |_msg: Message| -> Result<Option<Message>, ConnError> {
            seen += 1;
            Ok(None)
        };
        let err = conn.on_readable(&mut handler).unwrap_err();
        assert!(matches!(err, ConnError::Disconnected));
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_closed_stream() {
        let mut conn = Connection::new(Closed, codec(), 64);
        let mut handler = |_msg: Message| -> Result<Option<Message>, ConnError> { Ok(None) };
        assert!(matches!(
            conn.on_readable(&mut handler),
            Err(ConnError::Disconnected)
        ));

        conn.enqueue_write(&Message::new("x")).unwrap();
        assert!(matches!(conn.on_writable(), Err(ConnError::Io(_))));
    }

    #[test]
    fn test_corrupt_input_is_fatal() {
        let small = PlainCodec::new(8);
        let mut conn = Connection::new(
            MockStream::with_reads(&[&[0, 0, 1, 0]]),
            small,
            4096,
        );
        let mut handler = |_msg: Message| -> Result<Option<Message>, ConnError> { Ok(None) };
        assert!(matches!(
            conn.on_readable(&mut handler),
            Err(ConnError::Frame(FrameError::Oversized { declared: 256, max: 8 }))
        ));
    }
}
