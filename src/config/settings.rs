//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable that turns on debug mode (`true` or `1`).
pub const DEBUG_ENV_VAR: &str = "MCP_DEBUG";

/// Queue bound applied when `shared_hosting` is on.
pub const SHARED_HOSTING_MAX_QUEUE: usize = 500;

/// Stream duration cap (seconds) applied when `shared_hosting` is on.
pub const SHARED_HOSTING_MAX_STREAM_SECS: u64 = 25;

/// Longest accepted `max_stream_duration` (seconds).
pub const MAX_STREAM_DURATION_SECS: u64 = 24 * 60 * 60;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server identity and error exposure.
    #[serde(default)]
    pub server: ServerConfig,

    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| -> Result<(), ConfigError> {
            Err(ConfigError::ValidationError { message })
        };

        if self.server.name.is_empty() {
            return invalid("server.name cannot be empty".to_string());
        }
        if self.http.session_timeout == 0 {
            return invalid("http.session_timeout must be greater than 0".to_string());
        }
        if self.http.max_queue_size == 0 {
            return invalid("http.max_queue_size must be greater than 0".to_string());
        }
        if self.http.sse_poll_interval_ms == 0 {
            return invalid("http.sse_poll_interval_ms must be greater than 0".to_string());
        }
        if self.http.max_stream_duration == 0
            || self.http.max_stream_duration > MAX_STREAM_DURATION_SECS
        {
            return invalid(format!(
                "http.max_stream_duration must be between 1 and {MAX_STREAM_DURATION_SECS} seconds"
            ));
        }
        if !self.http.endpoint.starts_with('/') {
            return invalid(format!(
                "Invalid http.endpoint '{}'. Must start with '/'",
                self.http.endpoint
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }
        Ok(())
    }

    /// Whether internal error detail may be sent to clients.
    ///
    /// True when `server.debug` is set or `MCP_DEBUG` is `true`/`1`.
    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.server.debug || debug_from_env(std::env::var(DEBUG_ENV_VAR).ok().as_deref())
    }
}

fn debug_from_env(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Server identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Name reported in `serverInfo`.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Expose internal handler error detail to clients.
    #[serde(default)]
    pub debug: bool,

    /// Usage hints returned in the initialize result.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            debug: false,
            instructions: None,
        }
    }
}

fn default_server_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

/// HTTP transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Path of the MCP endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Session inactivity timeout in seconds.
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,

    /// Bound on each session's outbound queue.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Allow SSE delivery on GET.
    #[serde(default = "default_true")]
    pub enable_sse: bool,

    /// Apply conservative limits for hosts that kill long requests.
    #[serde(default)]
    pub shared_hosting: bool,

    /// Return POST replies in the response body instead of queueing them.
    #[serde(default = "default_true")]
    pub sync_replies: bool,

    /// How often an SSE stream checks the queue, in milliseconds.
    #[serde(default = "default_sse_poll_interval_ms")]
    pub sse_poll_interval_ms: u64,

    /// Longest an SSE stream stays open, in seconds.
    #[serde(default = "default_max_stream_duration")]
    pub max_stream_duration: u64,

    /// Directory for file-backed sessions. In memory when unset.
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            endpoint: default_endpoint(),
            session_timeout: default_session_timeout(),
            max_queue_size: default_max_queue_size(),
            enable_sse: true,
            shared_hosting: false,
            sync_replies: true,
            sse_poll_interval_ms: default_sse_poll_interval_ms(),
            max_stream_duration: default_max_stream_duration(),
            session_dir: None,
        }
    }
}

impl HttpConfig {
    /// The settings actually applied, with shared-hosting limits folded in.
    #[must_use]
    pub fn effective(&self) -> Self {
        let mut effective = self.clone();
        if effective.shared_hosting {
            effective.enable_sse = false;
            effective.max_queue_size = effective.max_queue_size.min(SHARED_HOSTING_MAX_QUEUE);
            effective.max_stream_duration = effective
                .max_stream_duration
                .min(SHARED_HOSTING_MAX_STREAM_SECS);
        }
        effective
    }

    /// Session timeout as a duration.
    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }

    /// SSE poll interval, clamped to at most the session timeout.
    #[must_use]
    pub fn sse_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sse_poll_interval_ms).min(self.session_timeout())
    }

    /// SSE stream lifetime cap.
    #[must_use]
    pub const fn max_stream_duration(&self) -> Duration {
        Duration::from_secs(self.max_stream_duration)
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_endpoint() -> String {
    "/mcp".to_string()
}

const fn default_session_timeout() -> u64 {
    1800
}

const fn default_max_queue_size() -> usize {
    1000
}

const fn default_sse_poll_interval_ms() -> u64 {
    500
}

const fn default_max_stream_duration() -> u64 {
    300
}

const fn default_true() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
