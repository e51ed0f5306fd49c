//! Configuration module for chatterbox.

use serde::Deserialize;
use std::path::Path;

use crate::protocol::Framing;
use crate::{ChatterboxError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds to wait for the handshake record after accept.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Capacity of each session's outbound queue.
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,
    /// Record framing on the wire.
    #[serde(default)]
    pub framing: Framing,
    /// Timezone used for history timestamps (e.g., "Europe/Paris", "UTC").
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5566
}

fn default_max_connections() -> usize {
    64
}

fn default_handshake_timeout() -> u64 {
    5
}

fn default_outbound_queue_size() -> usize {
    256
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            handshake_timeout_secs: default_handshake_timeout(),
            outbound_queue_size: default_outbound_queue_size(),
            framing: Framing::default(),
            timezone: default_timezone(),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Server host to connect to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port to connect to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Record framing on the wire. Must match the server.
    #[serde(default)]
    pub framing: Framing,
}

impl ClientConfig {
    /// The `host:port` string to connect to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            framing: Framing::default(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/chatterbox.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/chatterbox.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Client configuration.
    #[serde(default)]
    pub client: ClientConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ChatterboxError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ChatterboxError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CHATTERBOX_HOST`: server bind host and client target host
    /// - `CHATTERBOX_PORT`: server port and client target port
    /// - `CHATTERBOX_DB`: database path
    ///
    /// Empty or unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CHATTERBOX_HOST") {
            if !host.is_empty() {
                self.server.host = host.clone();
                self.client.host = host;
            }
        }
        if let Ok(port) = std::env::var("CHATTERBOX_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
                self.client.port = port;
            }
        }
        if let Ok(path) = std::env::var("CHATTERBOX_DB") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - `max_connections` or `outbound_queue_size` is zero
    /// - `handshake_timeout_secs` is zero
    /// - `timezone` is not a known IANA zone name
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(ChatterboxError::Config(
                "server.max_connections must be greater than zero".to_string(),
            ));
        }
        if self.server.outbound_queue_size == 0 {
            return Err(ChatterboxError::Config(
                "server.outbound_queue_size must be greater than zero".to_string(),
            ));
        }
        if self.server.handshake_timeout_secs == 0 {
            return Err(ChatterboxError::Config(
                "server.handshake_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.server.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ChatterboxError::Config(format!(
                "unknown timezone: {}",
                self.server.timezone
            )));
        }
        Ok(())
    }
}
