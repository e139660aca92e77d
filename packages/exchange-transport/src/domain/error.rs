//! Transport Error Taxonomy
//!
//! Every failure surfaced by the transport core maps onto one of seven
//! [`ErrorKind`] values. Retry and reconnect decisions are made on the kind,
//! never on message text.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::connection::ConnectionState;

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Exchange rejected the call for exceeding its rate limit (HTTP 429).
    RateLimited,
    /// Credentials were rejected or a signature was invalid.
    AuthenticationFailed,
    /// The request itself was malformed (4xx other than 401/403/408/429).
    ClientError,
    /// The exchange failed to serve a valid request (5xx).
    ServerError,
    /// The network path failed: refused, reset, DNS, TLS.
    ConnectionError,
    /// An operation exceeded its time budget.
    Timeout,
    /// A payload could not be decoded.
    ParseError,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::RateLimited,
        Self::AuthenticationFailed,
        Self::ClientError,
        Self::ServerError,
        Self::ConnectionError,
        Self::Timeout,
        Self::ParseError,
    ];

    /// Whether the failure may succeed if tried again unchanged.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::ConnectionError | Self::Timeout
        )
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::AuthenticationFailed => "authentication_failed",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::ConnectionError => "connection_error",
            Self::Timeout => "timeout",
            Self::ParseError => "parse_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a request/response call after classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} (status {status:?}) after {attempts} attempt(s): {message}")]
pub struct RequestError {
    /// Classified kind.
    pub kind: ErrorKind,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// Response body excerpt or transport error text.
    pub message: String,
    /// Server-requested pause before the next attempt.
    pub retry_after: Option<Duration>,
    /// Number of dispatch attempts made.
    pub attempts: u32,
}

impl RequestError {
    /// Create a request error for a single attempt.
    #[must_use]
    pub fn new(kind: ErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            retry_after: None,
            attempts: 1,
        }
    }

    /// Attach a server-requested retry delay.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Set the attempt count.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Strategy set construction failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    /// A required strategy was not supplied.
    #[error("missing required strategy: {0}")]
    Missing(&'static str),
    /// Supplied strategies cannot work together.
    #[error("incompatible strategies: {0}")]
    Incompatible(String),
}

/// Errors produced by the transport core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Failed to open or use the network connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The remote closed the streaming connection.
    #[error("connection closed (code {code:?}): {reason}")]
    ConnectionClosed {
        /// Close code, when the remote sent one.
        code: Option<u16>,
        /// Close reason text.
        reason: String,
    },

    /// An operation exceeded its time budget.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The bounded operation.
        operation: &'static str,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The exchange rejected the connection's credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A frame or response body could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// The operation needs a live connection.
    #[error("not connected (state: {state})")]
    NotConnected {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// `initialize` was called on a manager that already started.
    #[error("connection manager already initialized")]
    AlreadyInitialized,

    /// No inbound activity arrived within the keep-alive timeout.
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),

    /// The reconnection policy ran out of attempts.
    #[error("reconnection exhausted after {attempts} attempt(s): {last_error}")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        last_error: String,
    },

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A request/response call failed terminally.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Strategy set validation failed.
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// The manager is shutting down.
    #[error("transport is shutting down")]
    Shutdown,
}

impl TransportError {
    /// Map the error onto the shared taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_)
            | Self::ConnectionClosed { .. }
            | Self::NotConnected { .. }
            | Self::ReconnectExhausted { .. }
            | Self::Shutdown => ErrorKind::ConnectionError,
            Self::Timeout { .. } | Self::HeartbeatTimeout(_) => ErrorKind::Timeout,
            Self::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Self::Parse(_) => ErrorKind::ParseError,
            Self::AlreadyInitialized | Self::InvalidRequest(_) | Self::Strategy(_) => {
                ErrorKind::ClientError
            }
            Self::Request(err) => err.kind,
        }
    }

    /// Close code carried by a remote close, if any.
    #[must_use]
    pub const fn close_code(&self) -> Option<u16> {
        match self {
            Self::ConnectionClosed { code, .. } => *code,
            _ => None,
        }
    }

    /// Shorthand for a timeout error.
    #[must_use]
    pub const fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout { operation, timeout }
    }
}

/// Result alias used throughout the crate.
pub type TransportResult<T> = Result<T, TransportError>;
