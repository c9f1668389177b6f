//! Task-per-connection server on tokio.
//!
//! Each accepted socket gets its own task that reads, decodes, calls the
//! handler, and writes the response inline. The codec and handler are the
//! same ones the readiness runtime uses.

use crate::config::Config;
use crate::error::ConnError;
use crate::runtime::{Decoded, FrameCodec, FrameHandler};
use bytes::{Buf, BytesMut};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Run the tokio-based server until the process exits.
pub fn run<C, H>(config: &Config, codec: C, handler: H) -> io::Result<()>
where
    C: FrameCodec,
    H: FrameHandler<C::Frame> + Clone + Send + 'static,
{
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if config.workers > 0 {
        builder.worker_threads(config.workers);
    }
    let runtime = builder.enable_all().build()?;
    runtime.block_on(serve(config.clone(), codec, handler))
}

async fn serve<C, H>(config: Config, codec: C, handler: H) -> io::Result<()>
where
    C: FrameCodec,
    H: FrameHandler<C::Frame> + Clone + Send + 'static,
{
    let listener = TcpListener::bind(&config.listen).await?;
    info!(address = %config.listen, wire = ?config.wire, "Server listening");

    let connection_limit = Arc::new(Semaphore::new(config.max_connections));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        // Wait for a connection slot
        let permit = match connection_limit.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Ok(()),
        };

        let accepted = tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("Shutdown requested");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!(peer = %addr, "New connection");
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
                }

                let codec = codec.clone();
                let mut handler = handler.clone();
                let read_chunk = config.read_chunk;

                tokio::spawn(async move {
                    match handle_connection(stream, &codec, &mut handler, read_chunk).await {
                        Ok(()) => debug!(peer = %addr, "Peer disconnected"),
                        Err(e @ (ConnError::Frame(_) | ConnError::Payload(_))) => {
                            warn!(peer = %addr, error = %e, "Protocol error")
                        }
                        Err(e) => debug!(peer = %addr, error = %e, "Connection error"),
                    }
                    drop(permit);
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Serve one connection until the peer closes it or an error occurs.
///
/// An orderly close on a frame boundary returns `Ok`; a close in the middle
/// of a frame is `Disconnected`.
pub async fn handle_connection<S, C, H>(
    mut stream: S,
    codec: &C,
    handler: &mut H,
    read_chunk: usize,
) -> Result<(), ConnError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: FrameCodec,
    H: FrameHandler<C::Frame>,
{
    let mut buffer = BytesMut::with_capacity(read_chunk);
    let mut out = BytesMut::new();

    loop {
        while let Decoded::Frame { frame, consumed } = codec.decode(&buffer)? {
            buffer.advance(consumed);
            if let Some(response) = handler.on_frame(frame)? {
                codec.encode(&response, &mut out)?;
            }
        }

        if !out.is_empty() {
            stream.write_all(&out).await?;
            out.clear();
        }

        buffer.reserve(read_chunk);
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            return if buffer.is_empty() {
                Ok(())
            } else {
                Err(ConnError::Disconnected)
            };
        }
    }
}
