//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the ambient
//! configuration, metrics, and telemetry plumbing.

/// Exception classification from HTTP status and error text.
pub mod classifier;

/// Transport tuning loaded from the environment.
pub mod config;

/// Keep-alive ticks and silence detection.
pub mod heartbeat;

/// Pooled `reqwest` transport.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Token bucket rate limiter.
pub mod rate_limit;

/// Exponential backoff retry policy.
pub mod retry;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;

/// `tokio-tungstenite` streaming connection.
pub mod websocket;
