//! frame-reactor: a readiness-multiplexed TCP server and client for
//! length-prefixed binary frames.
//!
//! Two wire formats are supported:
//! - Framed: magic number, length, header with token and body kind, body
//! - Plain: length-prefixed UTF-8 text
//!
//! Features:
//! - mio event loops (epoll/kqueue) or a tokio task-per-connection runtime
//! - Pipelined requests, partial reads and writes
//! - Pluggable body decoders keyed by kind tag
//! - Configuration via CLI arguments or TOML file

mod client;
mod config;
mod error;
mod protocols;
mod runtime;

use config::{Config, Role, WireFormat};
use protocols::framed::{BodyRegistry, FramedCodec, ProtocolService};
use protocols::plain::{EchoService, PlainCodec};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.role {
        Role::Server => run_server(&config),
        Role::Client => {
            info!(
                connect = %config.connect,
                wire = ?config.wire,
                count = config.count,
                interval_ms = config.interval.as_millis() as u64,
                "Starting client"
            );
            client::run(&config)
        }
    }
}

fn run_server(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen = %config.listen,
        wire = ?config.wire,
        runtime = ?config.runtime,
        workers = config.workers,
        max_connections = config.max_connections,
        max_frame_size = config.max_frame_size,
        "Starting frame-reactor server"
    );

    match config.wire {
        WireFormat::Framed => {
            let codec = FramedCodec::new(config.max_frame_size);
            if codec.max_frame_size() < config.max_frame_size {
                warn!(
                    max_frame_size = codec.max_frame_size(),
                    "Frame size limited by the 16-bit length field"
                );
            }
            runtime::serve(config, codec, ProtocolService::new(BodyRegistry::default()))?
        }
        WireFormat::Plain => {
            runtime::serve(config, PlainCodec::new(config.max_frame_size), EchoService)?
        }
    }
    Ok(())
}
