//! Connection Model
//!
//! Lifecycle state, immutable connection parameters, and the reconnection
//! policy for a persistent streaming connection.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::error::StrategyError;
use super::message::OutboundMessage;

/// WebSocket close code for a connection dropped without a closing handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Lifecycle state of a streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not yet initialized.
    #[default]
    Disconnected,
    /// Initial connect/authenticate/subscribe in progress.
    Connecting,
    /// Live and subscribed.
    Connected,
    /// Lost the connection and trying to restore it.
    Reconnecting,
    /// Graceful shutdown in progress.
    Closing,
    /// Shut down.
    Closed,
    /// Gave up; needs a new manager.
    Error,
}

impl ConnectionState {
    /// Whether the connection is live or being restored.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// Whether no further transitions are possible except shutdown.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }

    /// Numeric encoding for gauges.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
            Self::Closing => 4.0,
            Self::Closed => 5.0,
            Self::Error => 6.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable parameters of one streaming connection.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Endpoint URL.
    pub url: String,
    /// Whether the exchange expects an authentication exchange after connect.
    pub requires_auth: bool,
    /// Opaque parameters for the authentication exchange.
    pub auth_params: HashMap<String, String>,
    /// Interval between keep-alive payloads.
    pub ping_interval: Duration,
    /// Silence tolerated after a keep-alive before the link is considered dead.
    pub ping_timeout: Duration,
    /// Reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt.
    pub reconnect_base_delay: Duration,
    /// Exchange-specific keep-alive frame.
    pub keepalive_payload: Option<OutboundMessage>,
    /// Bound on connect and authenticate.
    pub connect_timeout: Duration,
}

impl ConnectionContext {
    /// Create a context for `url` with default timings and no authentication.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            requires_auth: false,
            auth_params: HashMap::new(),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_secs(1),
            keepalive_payload: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Require authentication with the given parameters.
    #[must_use]
    pub fn with_auth(mut self, params: HashMap<String, String>) -> Self {
        self.requires_auth = true;
        self.auth_params = params;
        self
    }

    /// Set keep-alive timings.
    #[must_use]
    pub const fn with_ping(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ping_interval = interval;
        self.ping_timeout = timeout;
        self
    }

    /// Set reconnection limits.
    #[must_use]
    pub const fn with_reconnect(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_base_delay = base_delay;
        self
    }

    /// Set the keep-alive frame sent every ping interval.
    #[must_use]
    pub fn with_keepalive(mut self, payload: OutboundMessage) -> Self {
        self.keepalive_payload = Some(payload);
        self
    }

    /// Set the connect/authenticate bound.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.auth_params.keys().collect();
        keys.sort();
        f.debug_struct("ConnectionContext")
            .field("url", &self.url)
            .field("requires_auth", &self.requires_auth)
            .field("auth_params", &keys)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_base_delay", &self.reconnect_base_delay)
            .field("keepalive_payload", &self.keepalive_payload.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Reconnection behavior of a streaming connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Attempts before entering the error state.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Growth factor per attempt.
    pub backoff_factor: f64,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Reset the attempt counter whenever the link, or a reconnection attempt,
    /// closes with `abnormal_closure_code`.
    pub reset_on_abnormal_closure: bool,
    /// Close code treated as abnormal.
    pub abnormal_closure_code: u16,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            reset_on_abnormal_closure: true,
            abnormal_closure_code: ABNORMAL_CLOSURE,
        }
    }
}

impl ReconnectionPolicy {
    /// Derive a policy from connection parameters.
    #[must_use]
    pub fn from_context(context: &ConnectionContext) -> Self {
        Self {
            max_attempts: context.max_reconnect_attempts,
            initial_delay: context.reconnect_base_delay,
            max_delay: Self::default().max_delay.max(context.reconnect_base_delay),
            ..Self::default()
        }
    }

    /// Delay before the zero-based attempt `attempt`.
    ///
    /// `min(initial_delay * backoff_factor^attempt, max_delay)`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let scaled = self.initial_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let ceiling = self.max_delay.as_nanos() as f64;
        if !scaled.is_finite() || scaled >= ceiling {
            return self.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = scaled.max(0.0).round() as u64;
        Duration::from_nanos(nanos)
    }

    /// Check the policy is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Incompatible`] for a shrinking factor, an
    /// initial delay above the ceiling, or zero attempts.
    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(StrategyError::Incompatible(format!(
                "backoff factor {} must be >= 1",
                self.backoff_factor
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(StrategyError::Incompatible(format!(
                "initial delay {:?} exceeds max delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        if self.max_attempts == 0 {
            return Err(StrategyError::Incompatible(
                "reconnection policy allows no attempts".to_string(),
            ));
        }
        Ok(())
    }
}
