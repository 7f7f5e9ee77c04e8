//! Error types for mcp-engine.
//!
//! Protocol-level failures (parse, shape, gating, handler errors) are not
//! here: they are JSON-RPC error envelopes built by [`crate::mcp::protocol`]
//! and [`crate::mcp::dispatcher`]. This module holds the errors that surface
//! outside the protocol: configuration, session bookkeeping and storage.

use std::path::PathBuf;

use axum::http::StatusCode;
use thiserror::Error;

use crate::mcp::protocol::{ErrorCode, JsonRpcError, JsonRpcErrorData};
use crate::mcp::session::SessionId;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors raised by a [`crate::mcp::store::SessionStore`] backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the backing storage failed.
    #[error("session store I/O failed")]
    Io(#[from] std::io::Error),

    /// A stored session record could not be encoded or decoded.
    #[error("session record is corrupt")]
    Serialization(#[from] serde_json::Error),

    /// A record was saved under a lock held for a different session.
    #[error("lock held for session {held} used to save session {record}")]
    LockMismatch {
        /// Session the lock was acquired for.
        held: SessionId,
        /// Session the record belongs to.
        record: SessionId,
    },

    /// Any other backend failure.
    #[error("session store failure: {0}")]
    Backend(String),
}

/// Errors from session lifecycle and queue operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No session with this id exists.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The session existed but outlived its inactivity timeout.
    #[error("session expired: {0}")]
    Expired(SessionId),

    /// The outbound queue is at capacity; the new message was rejected.
    #[error("outbound queue is full ({limit} messages)")]
    QueueFull {
        /// The configured queue bound.
        limit: usize,
    },

    /// A client-supplied session id is malformed.
    #[error("invalid session id: {0}")]
    InvalidId(String),

    /// The session store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// JSON-RPC code used when this error is reported in an envelope.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) | Self::Expired(_) => ErrorCode::ServerError(-32001),
            Self::InvalidId(_) => ErrorCode::InvalidRequest,
            Self::QueueFull { .. } | Self::Store(_) => ErrorCode::ServerError(-32000),
        }
    }

    /// HTTP status used when this error ends a transport request.
    #[must_use]
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::Expired(_) => StatusCode::NOT_FOUND,
            Self::InvalidId(_) => StatusCode::BAD_REQUEST,
            Self::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The error as a JSON-RPC envelope with a `null` id.
    ///
    /// Store failures are reported generically; their detail stays in the logs.
    #[must_use]
    pub fn to_jsonrpc(&self) -> JsonRpcError {
        let message = match self {
            Self::Store(_) => "Session storage unavailable".to_string(),
            other => other.to_string(),
        };
        JsonRpcError::new(None, JsonRpcErrorData::with_message(self.error_code(), message))
    }
}
