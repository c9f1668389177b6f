//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! ## Interest bookkeeping
//!
//! Each connection carries the interest mask it wants. After every dispatch
//! the loop compares it with what was registered before the dispatch and
//! reregisters on change, so writable interest exists exactly while frames
//! are queued.

use super::listener::Listener;
use crate::config::Config;
use crate::error::ConnError;
use crate::runtime::{Connection, FrameCodec, FrameHandler, InterestSet, ReadyEvent};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Poll timeout used while connections may be stranded in the accept queue.
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

/// Tunables for one event loop.
#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub max_connections: usize,
    /// Capacity of the poll event buffer.
    pub batch_size: usize,
    pub read_chunk: usize,
    /// Queued response bytes at which a connection stops reading.
    pub write_high_water: usize,
}

impl From<&Config> for LoopOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_connections: config.max_connections,
            batch_size: config.batch_size,
            read_chunk: config.read_chunk,
            write_high_water: config.write_high_water,
        }
    }
}

/// Handle for stopping a running loop from another thread.
#[derive(Clone)]
pub struct LoopHandle {
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Ask the loop to exit after its current iteration.
    pub fn shutdown(&self) -> io::Result<()> {
        self.shutdown.store(true, Ordering::Release);
        self.waker.wake()
    }
}

/// Single-threaded reactor owning a listener and every connection it accepts.
pub struct EventLoop<C: FrameCodec, H> {
    worker_id: usize,
    poll: Poll,
    events: Events,
    /// Events copied out of the last poll.
    ready: Vec<ReadyEvent>,
    /// Connections closed during the current iteration.
    closed: Vec<usize>,
    listener: Listener,
    connections: Slab<Connection<TcpStream, C>>,
    codec: C,
    handler: H,
    options: LoopOptions,
    /// An accept failed, so the listener may hold connections that will not
    /// produce another edge.
    retry_accept: bool,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
}

impl<C, H> EventLoop<C, H>
where
    C: FrameCodec,
    H: FrameHandler<C::Frame>,
{
    pub fn new(
        worker_id: usize,
        mut listener: Listener,
        codec: C,
        handler: H,
        options: LoopOptions,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        listener.register(poll.registry(), LISTENER_TOKEN)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Self {
            worker_id,
            poll,
            events: Events::with_capacity(options.batch_size.max(1)),
            ready: Vec::with_capacity(options.batch_size.max(1)),
            closed: Vec::new(),
            listener,
            connections: Slab::with_capacity(options.max_connections),
            codec,
            handler,
            options,
            retry_accept: false,
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            waker: Arc::clone(&self.waker),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of live connections.
    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run until [`LoopHandle::shutdown`] is called.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            worker = self.worker_id,
            addr = %self.local_addr()?,
            "Worker started"
        );
        while !self.shutdown.load(Ordering::Acquire) {
            self.run_once(None)?;
        }
        info!(
            worker = self.worker_id,
            connections = self.connections.len(),
            "Worker stopped"
        );
        Ok(())
    }

    /// One iteration: wait for readiness, then dispatch every event.
    ///
    /// Returns the number of events handled.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout = if self.retry_accept {
            Some(timeout.map_or(ACCEPT_RETRY, |t| t.min(ACCEPT_RETRY)))
        } else {
            timeout
        };

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        if std::mem::take(&mut self.retry_accept) {
            self.accept_connections();
        }

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(self.events.iter().map(ReadyEvent::from_mio));
        self.closed.clear();

        for event in &ready {
            match event.token {
                LISTENER_TOKEN => self.accept_connections(),
                // Shutdown flag is checked by `run`.
                WAKER_TOKEN => {}
                Token(conn_id) => {
                    // The slot may have been closed, or closed and reused by
                    // an accept, earlier in this iteration.
                    if self.closed.contains(&conn_id) {
                        continue;
                    }
                    if let Err(e) = self.dispatch(conn_id, event) {
                        self.log_conn_error(conn_id, &e);
                        self.close_connection(conn_id);
                    }
                }
            }
        }

        let handled = ready.len();
        self.ready = ready;
        Ok(handled)
    }

    fn accept_connections(&mut self) {
        loop {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(Some(accepted)) => accepted,
                Ok(None) => break,
                Err(e) => {
                    // EMFILE and friends: try again on the next iteration.
                    error!(worker = self.worker_id, error = %e, "Accept error");
                    self.retry_accept = true;
                    break;
                }
            };

            if self.connections.len() >= self.options.max_connections {
                warn!(worker = self.worker_id, peer = %peer, "Connection limit reached");
                continue;
            }

            let entry = self.connections.vacant_entry();
            let conn_id = entry.key();
            if let Err(e) =
                self.poll
                    .registry()
                    .register(&mut stream, Token(conn_id), Interest::READABLE)
            {
                error!(worker = self.worker_id, peer = %peer, error = %e, "Register failed");
                continue;
            }
            entry.insert(
                Connection::new(stream, self.codec.clone(), self.options.read_chunk)
                    .with_write_high_water(self.options.write_high_water),
            );

            debug!(
                worker = self.worker_id,
                conn_id,
                peer = %peer,
                "Accepted connection"
            );
        }
    }

    fn dispatch(&mut self, conn_id: usize, event: &ReadyEvent) -> Result<(), ConnError> {
        let conn = match self.connections.get_mut(conn_id) {
            Some(conn) => conn,
            None => return Ok(()),
        };

        if event.error {
            let err = conn
                .stream()
                .take_error()?
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "socket error"));
            return Err(err.into());
        }

        let registered = conn.interest();

        if event.ready.contains(InterestSet::READABLE) {
            conn.on_readable(&mut self.handler)?;
        }

        // Writable interest may have been dropped since the poll returned.
        if event.ready.contains(InterestSet::WRITABLE)
            && conn.interest().contains(InterestSet::WRITABLE)
        {
            conn.on_writable()?;
        }

        if conn.interest() != registered {
            sync_interest(self.poll.registry(), conn, Token(conn_id))?;
        }
        Ok(())
    }

    fn log_conn_error(&self, conn_id: usize, err: &ConnError) {
        match err {
            e if e.is_disconnect() => {
                debug!(worker = self.worker_id, conn_id, "Peer disconnected")
            }
            ConnError::Frame(_) | ConnError::Payload(_) => {
                warn!(worker = self.worker_id, conn_id, error = %err, "Protocol error")
            }
            _ => debug!(worker = self.worker_id, conn_id, error = %err, "Connection error"),
        }
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.try_remove(conn_id) {
            let _ = self.poll.registry().deregister(conn.stream_mut());
            self.closed.push(conn_id);
            debug!(worker = self.worker_id, conn_id, "Connection closed");
        }
    }
}

/// Bring a connection's mio registration in line with its interest mask.
pub(crate) fn sync_interest<C: FrameCodec>(
    registry: &Registry,
    conn: &mut Connection<TcpStream, C>,
    token: Token,
) -> io::Result<()> {
    match conn.interest().to_mio() {
        Some(interest) => registry.reregister(conn.stream_mut(), token, interest),
        None => registry.deregister(conn.stream_mut()),
    }
}

/// Run the mio-based server with one event loop per worker thread.
pub fn run<C, H>(config: &Config, codec: C, handler: H) -> io::Result<()>
where
    C: FrameCodec,
    H: FrameHandler<C::Frame> + Clone + Send + 'static,
{
    let num_workers = if config.workers == 0 {
        num_cpus()
    } else {
        config.workers
    };

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    info!(
        workers = num_workers,
        addr = %addr,
        wire = ?config.wire,
        "Starting mio runtime"
    );

    let options = LoopOptions::from(config);
    let mut threads = Vec::with_capacity(num_workers);
    let mut loop_handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        // Bind and build up front so setup errors surface before any worker starts.
        let listener = Listener::bind(addr)?;
        let mut event_loop =
            EventLoop::new(worker_id, listener, codec.clone(), handler.clone(), options)?;
        loop_handles.push(event_loop.handle());

        let thread = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = event_loop.run() {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;

        threads.push(thread);
    }

    spawn_shutdown_listener(loop_handles)?;

    // Wait for all workers
    for thread in threads {
        let _ = thread.join();
    }

    info!("Server stopped");
    Ok(())
}

/// Stop every loop in `handles` when the process receives Ctrl-C.
fn spawn_shutdown_listener(handles: Vec<LoopHandle>) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("shutdown".to_string())
        .spawn(move || {
            if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
                error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Shutdown requested");
            shutdown_all(&handles);
        })?;
    Ok(())
}

fn shutdown_all(handles: &[LoopHandle]) {
    for handle in handles {
        if let Err(e) = handle.shutdown() {
            error!(error = %e, "Failed to wake worker");
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
