//! Configuration for the frame server and client.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::{DEFAULT_READ_CHUNK, DEFAULT_WRITE_HIGH_WATER};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which side of the connection this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Server,
    Client,
}

/// Server I/O model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// One readiness loop per worker thread (epoll/kqueue)
    #[default]
    Mio,
    /// tokio, one task per connection
    Threaded,
}

/// Wire format spoken on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Magic, length, header, body
    Framed,
    /// Length-prefixed UTF-8 text
    #[default]
    Plain,
}

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "frame-reactor")]
#[command(version)]
#[command(about = "Length-prefixed frame server and client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run as server or client
    #[arg(long, value_enum)]
    pub role: Option<Role>,

    /// Address to bind to (e.g., 127.0.0.1:8888)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (0 = one per CPU core)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections per worker
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Server I/O model
    #[arg(long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Wire format
    #[arg(long, value_enum)]
    pub wire: Option<WireFormat>,

    /// Largest frame accepted or produced, in bytes
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Address the client connects to
    #[arg(long)]
    pub connect: Option<String>,

    /// Number of requests the client sends (0 = until the server disconnects)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Milliseconds between a response and the next request
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Client request text for the plain wire format
    #[arg(long)]
    pub message: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub workers: usize,
    pub max_connections: usize,
    pub runtime: RuntimeType,
    /// Events drained per poll
    pub batch_size: usize,
    /// Queued response bytes at which a connection stops reading
    pub write_high_water: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_address(),
            workers: 1,
            max_connections: 1024,
            runtime: RuntimeType::default(),
            batch_size: 1024,
            write_high_water: DEFAULT_WRITE_HIGH_WATER,
        }
    }
}

/// Wire protocol configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub wire: WireFormat,
    pub max_frame_size: usize,
    /// Bytes requested per read syscall
    pub read_chunk: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            wire: WireFormat::default(),
            max_frame_size: 1024 * 1024, // 1 MiB
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Client configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connect: String,
    pub count: usize,
    pub interval_ms: u64,
    pub message: Option<String>,
    /// Header token sent with framed requests
    pub token: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect: default_address(),
            count: 1,
            interval_ms: 3000,
            message: None,
            token: "i am token".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8888".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub listen: String,
    pub workers: usize,
    pub max_connections: usize,
    pub runtime: RuntimeType,
    pub batch_size: usize,
    pub write_high_water: usize,
    pub wire: WireFormat,
    pub max_frame_size: usize,
    pub read_chunk: usize,
    pub connect: String,
    pub count: usize,
    pub interval: Duration,
    pub message: Option<String>,
    pub token: String,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match cli.config {
            Some(ref path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::FileRead(path.clone(), e))?;
                toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.clone(), e))?
            }
            None => TomlConfig::default(),
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            role: cli.role.unwrap_or_default(),
            listen: cli.listen.unwrap_or(toml.server.listen),
            workers: cli.workers.unwrap_or(toml.server.workers),
            max_connections: cli.max_connections.unwrap_or(toml.server.max_connections),
            runtime: cli.runtime.unwrap_or(toml.server.runtime),
            batch_size: toml.server.batch_size,
            write_high_water: toml.server.write_high_water,
            wire: cli.wire.unwrap_or(toml.protocol.wire),
            max_frame_size: cli.max_frame_size.unwrap_or(toml.protocol.max_frame_size),
            read_chunk: toml.protocol.read_chunk,
            connect: cli.connect.unwrap_or(toml.client.connect),
            count: cli.count.unwrap_or(toml.client.count),
            interval: Duration::from_millis(cli.interval_ms.unwrap_or(toml.client.interval_ms)),
            message: cli.message.or(toml.client.message),
            token: toml.client.token,
            log_level: cli.log_level.unwrap_or(toml.logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("max_connections", self.max_connections),
            ("batch_size", self.batch_size),
            ("write_high_water", self.write_high_water),
            ("max_frame_size", self.max_frame_size),
            ("read_chunk", self.read_chunk),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field: name,
                    reason: "must be greater than zero",
                });
            }
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::merge(CliArgs::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.listen, "127.0.0.1:8888");
        assert_eq!(config.connect, "127.0.0.1:8888");
        assert_eq!(config.workers, 1);
        assert_eq!(config.runtime, RuntimeType::Mio);
        assert_eq!(config.wire, WireFormat::Plain);
        assert_eq!(config.max_frame_size, 1024 * 1024);
        assert_eq!(config.interval, Duration::from_secs(3));
        assert_eq!(config.token, "i am token");
        assert_eq!(config.message, None);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            workers = 4
            runtime = "threaded"

            [protocol]
            wire = "framed"
            max_frame_size = 4096

            [client]
            count = 10
            interval_ms = 250
            token = "abc"

            [logging]
            level = "debug"
        "#;

        let toml: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(toml.server.max_connections, 1024);

        let config = Config::merge(CliArgs::default(), toml).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.workers, 4);
        assert_eq!(config.runtime, RuntimeType::Threaded);
        assert_eq!(config.wire, WireFormat::Framed);
        assert_eq!(config.max_frame_size, 4096);
        assert_eq!(config.read_chunk, 16 * 1024);
        assert_eq!(config.count, 10);
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.token, "abc");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml: TomlConfig = toml::from_str(
            r#"
            [server]
            workers = 4
            [protocol]
            wire = "framed"
            "#,
        )
        .unwrap();
        let cli = CliArgs::parse_from([
            "frame-reactor",
            "--role",
            "client",
            "--workers",
            "2",
            "--wire",
            "plain",
            "--message",
            "hi",
        ]);

        let config = Config::merge(cli, toml).unwrap();
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.workers, 2);
        assert_eq!(config.wire, WireFormat::Plain);
        assert_eq!(config.message.as_deref(), Some("hi"));
    }

    #[test]
    fn test_zero_frame_size_rejected() {
        let cli = CliArgs {
            max_frame_size: Some(0),
            ..Default::default()
        };
        let err = Config::merge(cli, TomlConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "max_frame_size",
                ..
            }
        ));
    }

    #[test]
    fn test_unlimited_count_accepted() {
        let cli = CliArgs::parse_from(["frame-reactor", "--role", "client", "-n", "0"]);
        let config = Config::merge(cli, TomlConfig::default()).unwrap();
        assert_eq!(config.count, 0);
    }

    #[test]
    fn test_unknown_wire_rejected() {
        let result: Result<TomlConfig, _> = toml::from_str("[protocol]\nwire = \"morse\"\n");
        assert!(result.is_err());
    }
}
