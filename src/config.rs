//! Engine configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). The protocol cores never read the
//! environment themselves; they receive [`HttpLimits`] and [`WsLimits`]
//! derived from [`EngineConfig`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::EngineError;

/// Bytes per megabyte, as used by `HTTP_MAX_BODY_MB`.
const MB: u64 = 1024 * 1024;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Limits consumed by the HTTP parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpLimits {
    /// Maximum size of the request head, and of bodies kept in the buffer.
    pub max_head_size: usize,
    /// Maximum accepted `Content-Length`, in bytes.
    pub max_body_size: u64,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            max_head_size: 8192,
            max_body_size: 50 * MB,
        }
    }
}

/// Limits consumed by the WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsLimits {
    /// Largest accepted frame or assembled message, in bytes.
    pub max_message_size: usize,
    /// Interval between server-initiated pings.
    pub ping_interval: Duration,
}

impl Default for WsLimits {
    fn default() -> Self {
        Self {
            max_message_size: 256 * 1024,
            ping_interval: Duration::from_secs(40),
        }
    }
}

/// Top-level engine configuration.
///
/// Loaded once at startup via [`EngineConfig::from_env`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Socket address to bind the server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// HTTP parser limits.
    pub http: HttpLimits,

    /// WebSocket limits.
    pub ws: WsLimits,

    /// Directory for spooled request bodies. `None` uses the system temp dir.
    pub spool_dir: Option<PathBuf>,

    /// Capacity of the in-process fan-out bus.
    pub fanout_capacity: usize,

    /// Log output format.
    pub log_format: LogFormat,
}

impl EngineConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `LISTEN_ADDR` is set but cannot
    /// be parsed as a [`SocketAddr`].
    pub fn from_env() -> Result<Self, EngineError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `LISTEN_ADDR` is present but
    /// invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_addr = lookup("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let listen_addr: SocketAddr = raw_addr
            .parse()
            .map_err(|e| EngineError::Config(format!("LISTEN_ADDR `{raw_addr}`: {e}")))?;

        let http_defaults = HttpLimits::default();
        let ws_defaults = WsLimits::default();

        let max_body_mb: u64 = parse_var(&lookup, "HTTP_MAX_BODY_MB", 50);
        let http = HttpLimits {
            max_head_size: parse_var(&lookup, "HTTP_MAX_HEAD_SIZE", http_defaults.max_head_size),
            max_body_size: max_body_mb.saturating_mul(MB),
        };

        let ping_secs: u64 = parse_var(
            &lookup,
            "WS_PING_INTERVAL_SECS",
            ws_defaults.ping_interval.as_secs(),
        );
        let ws = WsLimits {
            max_message_size: parse_var(
                &lookup,
                "WS_MAX_MESSAGE_SIZE",
                ws_defaults.max_message_size,
            ),
            ping_interval: Duration::from_secs(ping_secs.max(1)),
        };

        let spool_dir = lookup("SPOOL_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            listen_addr,
            http,
            ws,
            spool_dir,
            fanout_capacity: parse_var(&lookup, "FANOUT_CAPACITY", 10_000),
            log_format,
        })
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
