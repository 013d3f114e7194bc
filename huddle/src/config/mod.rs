//! Configuration system for the Huddle client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/huddle/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use huddle_proto::ident::UserId;

use crate::channel::ws::WsConnector;
use crate::link::{Credentials, LinkConfig, ReconnectConfig};
use crate::session::SessionConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    connection: ConnectionFileConfig,
    delivery: DeliveryFileConfig,
}

/// `[connection]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConnectionFileConfig {
    server_url: Option<String>,
    user_id: Option<String>,
    token: Option<String>,
    default_peer: Option<String>,
    connect_timeout_secs: Option<u64>,
    auth_timeout_secs: Option<u64>,
    keepalive_interval_secs: Option<u64>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
}

/// `[delivery]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DeliveryFileConfig {
    delivery_timeout_ms: Option<u64>,
    duplicate_window_ms: Option<u64>,
    command_buffer: Option<usize>,
    event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the Huddle client.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Huddle messaging client")]
pub struct CliArgs {
    /// Router WebSocket URL (e.g., `ws://127.0.0.1:9400/ws`).
    #[arg(long, env = "HUDDLE_SERVER_URL")]
    pub server_url: Option<String>,

    /// Local user identity.
    #[arg(long, env = "HUDDLE_USER_ID")]
    pub user_id: Option<String>,

    /// Opaque session token from the login flow.
    #[arg(long, env = "HUDDLE_TOKEN")]
    pub token: Option<String>,

    /// Peer to open a conversation with on startup.
    #[arg(long, env = "HUDDLE_PEER")]
    pub peer: Option<String>,

    /// Path to config file (default: `~/.config/huddle/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "HUDDLE_LOG")]
    pub log_level: String,

    /// Log file path (default: temp dir).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Router WebSocket URL.
    pub server_url: Option<String>,
    /// Local user identity string.
    pub user_id: Option<String>,
    /// Opaque session token.
    pub token: Option<String>,
    /// Peer to open on startup.
    pub default_peer: Option<String>,
    /// Timeout for opening the transport.
    pub connect_timeout: Duration,
    /// Timeout for the authentication confirmation.
    pub auth_timeout: Duration,
    /// Interval between keepalive pings.
    pub keepalive_interval: Duration,
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
    /// How long a send may stay unacknowledged.
    pub delivery_timeout: Duration,
    /// Duplicate suppression window in milliseconds.
    pub duplicate_window_ms: u64,
    /// Capacity of the command channel.
    pub command_buffer: usize,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            user_id: None,
            token: None,
            default_peer: None,
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            delivery_timeout: Duration::from_secs(5),
            duplicate_window_ms: 1000,
            command_buffer: 256,
            event_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise a missing default-path file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let conn = &file.connection;
        let delivery = &file.delivery;

        Self {
            server_url: cli.server_url.clone().or_else(|| conn.server_url.clone()),
            user_id: cli.user_id.clone().or_else(|| conn.user_id.clone()),
            token: cli.token.clone().or_else(|| conn.token.clone()),
            default_peer: cli.peer.clone().or_else(|| conn.default_peer.clone()),
            connect_timeout: conn
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            auth_timeout: conn
                .auth_timeout_secs
                .map_or(defaults.auth_timeout, Duration::from_secs),
            keepalive_interval: conn
                .keepalive_interval_secs
                .map_or(defaults.keepalive_interval, Duration::from_secs),
            reconnect: ReconnectConfig {
                initial_delay: conn
                    .reconnect_initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: conn
                    .reconnect_max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
                max_attempts: conn
                    .reconnect_max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
            },
            delivery_timeout: delivery
                .delivery_timeout_ms
                .map_or(defaults.delivery_timeout, Duration::from_millis),
            duplicate_window_ms: delivery
                .duplicate_window_ms
                .unwrap_or(defaults.duplicate_window_ms),
            command_buffer: delivery.command_buffer.unwrap_or(defaults.command_buffer),
            event_buffer: delivery.event_buffer.unwrap_or(defaults.event_buffer),
        }
    }

    /// Build a [`SessionConfig`] from the resolved settings.
    ///
    /// Returns `None` unless both a user id and a token are configured.
    #[must_use]
    pub fn to_session_config(&self) -> Option<SessionConfig> {
        let user_id = self.user_id.as_deref()?;
        let token = self.token.as_deref()?;
        if user_id.is_empty() {
            return None;
        }
        Some(SessionConfig {
            credentials: Credentials {
                user_id: UserId::new(user_id),
                token: token.to_string(),
            },
            link: LinkConfig {
                connect_timeout: self.connect_timeout,
                auth_timeout: self.auth_timeout,
                keepalive_interval: self.keepalive_interval,
                reconnect: self.reconnect.clone(),
            },
            delivery_timeout: self.delivery_timeout,
            duplicate_window_ms: self.duplicate_window_ms,
            command_buffer: self.command_buffer,
            event_buffer: self.event_buffer,
        })
    }

    /// Build a [`WsConnector`] from the resolved settings.
    ///
    /// Returns `None` unless a server URL is configured.
    #[must_use]
    pub fn to_connector(&self) -> Option<WsConnector> {
        self.server_url
            .as_ref()
            .map(|url| WsConnector::new(url.clone(), self.connect_timeout))
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the client.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("huddle").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
