//! Transport Configuration Settings
//!
//! Tuning knobs for both managers, loaded from environment variables with
//! defaults for anything unset or unparseable.

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::metrics::DEFAULT_LATENCY_WINDOW;
use crate::domain::request::{PerformanceTargets, RateLimitContext};

/// Streaming connection manager settings.
#[derive(Debug, Clone)]
pub struct StreamingSettings {
    /// Inbound queue capacity; the oldest frame is dropped when full.
    pub queue_capacity: usize,
    /// Bound on each queue wait, so the drain task re-checks shutdown.
    pub queue_poll_interval: Duration,
    /// Parse-plus-dispatch latency budget per message.
    pub hft_latency_budget: Duration,
    /// Bound on joining each task during `close`.
    pub shutdown_timeout: Duration,
    /// Bound on handing a frame to the connection task.
    pub send_timeout: Duration,
    /// Latency samples retained for percentiles.
    pub latency_window: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            queue_poll_interval: Duration::from_millis(100),
            hft_latency_budget: Duration::from_millis(1),
            shutdown_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            latency_window: DEFAULT_LATENCY_WINDOW,
        }
    }
}

/// Request execution manager settings.
#[derive(Debug, Clone)]
pub struct RequestSettings {
    /// Latency samples retained for percentiles.
    pub latency_window: usize,
    /// Sustained request rate for the default limiter.
    pub requests_per_second: f64,
    /// Burst capacity for the default limiter.
    pub burst_capacity: u32,
    /// Bound on waiting for a rate limit permit.
    pub acquire_timeout: Duration,
    /// Per-request latency target.
    pub max_latency: Duration,
    /// Ceiling for retry policies.
    pub max_retry_attempts: u32,
}

impl Default for RequestSettings {
    fn default() -> Self {
        let limits = RateLimitContext::default();
        let targets = PerformanceTargets::default();
        Self {
            latency_window: DEFAULT_LATENCY_WINDOW,
            requests_per_second: limits.requests_per_second,
            burst_capacity: limits.burst_capacity,
            acquire_timeout: limits.acquire_timeout,
            max_latency: targets.max_latency,
            max_retry_attempts: targets.max_retry_attempts,
        }
    }
}

impl RequestSettings {
    /// Rate limit context built from these settings.
    #[must_use]
    pub fn rate_limit_context(&self, endpoint_weights: HashMap<String, u32>) -> RateLimitContext {
        RateLimitContext {
            requests_per_second: self.requests_per_second,
            burst_capacity: self.burst_capacity,
            endpoint_weights,
            acquire_timeout: self.acquire_timeout,
        }
    }

    /// Performance targets built from these settings.
    #[must_use]
    pub fn performance_targets(&self) -> PerformanceTargets {
        PerformanceTargets {
            max_latency: self.max_latency,
            max_retry_attempts: self.max_retry_attempts,
            ..PerformanceTargets::default()
        }
    }
}

/// Complete transport configuration.
#[derive(Debug, Clone, Default)]
pub struct TransportSettings {
    /// Streaming side.
    pub streaming: StreamingSettings,
    /// Request side.
    pub request: RequestSettings,
}

impl TransportSettings {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting values are out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let streaming_defaults = StreamingSettings::default();
        let streaming = StreamingSettings {
            queue_capacity: parse_env_usize(
                "EXCHANGE_TRANSPORT_QUEUE_CAPACITY",
                streaming_defaults.queue_capacity,
            ),
            queue_poll_interval: parse_env_duration_millis(
                "EXCHANGE_TRANSPORT_QUEUE_POLL_MS",
                streaming_defaults.queue_poll_interval,
            ),
            hft_latency_budget: parse_env_duration_micros(
                "EXCHANGE_TRANSPORT_HFT_BUDGET_US",
                streaming_defaults.hft_latency_budget,
            ),
            shutdown_timeout: parse_env_duration_millis(
                "EXCHANGE_TRANSPORT_SHUTDOWN_TIMEOUT_MS",
                streaming_defaults.shutdown_timeout,
            ),
            send_timeout: parse_env_duration_millis(
                "EXCHANGE_TRANSPORT_SEND_TIMEOUT_MS",
                streaming_defaults.send_timeout,
            ),
            latency_window: parse_env_usize(
                "EXCHANGE_TRANSPORT_STREAM_LATENCY_WINDOW",
                streaming_defaults.latency_window,
            ),
        };

        let request_defaults = RequestSettings::default();
        let request = RequestSettings {
            latency_window: parse_env_usize(
                "EXCHANGE_TRANSPORT_REQUEST_LATENCY_WINDOW",
                request_defaults.latency_window,
            ),
            requests_per_second: parse_env_f64(
                "EXCHANGE_TRANSPORT_REQUESTS_PER_SECOND",
                request_defaults.requests_per_second,
            ),
            burst_capacity: parse_env_u32(
                "EXCHANGE_TRANSPORT_BURST_CAPACITY",
                request_defaults.burst_capacity,
            ),
            acquire_timeout: parse_env_duration_millis(
                "EXCHANGE_TRANSPORT_ACQUIRE_TIMEOUT_MS",
                request_defaults.acquire_timeout,
            ),
            max_latency: parse_env_duration_millis(
                "EXCHANGE_TRANSPORT_MAX_LATENCY_MS",
                request_defaults.max_latency,
            ),
            max_retry_attempts: parse_env_u32(
                "EXCHANGE_TRANSPORT_MAX_RETRY_ATTEMPTS",
                request_defaults.max_retry_attempts,
            ),
        };

        let settings = Self { streaming, request };
        settings.validate()?;
        Ok(settings)
    }

    /// Check every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streaming.queue_capacity < 2 {
            return Err(ConfigError::Invalid {
                key: "queue_capacity",
                reason: "must be at least 2".to_string(),
            });
        }
        if self.streaming.queue_poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "queue_poll_interval",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.request.burst_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "burst_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.request.requests_per_second.is_finite() && self.request.requests_per_second > 0.0)
        {
            return Err(ConfigError::Invalid {
                key: "requests_per_second",
                reason: format!("{} is not a positive rate", self.request.requests_per_second),
            });
        }
        if self.request.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "max_retry_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range.
    #[error("invalid configuration value for {key}: {reason}")]
    Invalid {
        /// Setting name.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_env_duration_micros(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_micros)
}
