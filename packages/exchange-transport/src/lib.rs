#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Exchange Transport - Streaming and Request Core for Exchange Integrations
//!
//! Two managers carry every exchange integration: a streaming connection
//! manager (connect, authenticate, subscribe, keep alive, reconnect, ordered
//! dispatch) and a request execution manager (rate limiting, signing,
//! classified retries, pooled HTTP). Exchange-specific behavior plugs in
//! through strategy traits.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Transport data model
//!   - `connection`: lifecycle states, connection context, reconnection policy
//!   - `message`: raw, inbound and parsed frames
//!   - `request`: HTTP request, response and budget types
//!   - `metrics`: rolling latency window and snapshots
//!   - `error`: error taxonomy
//!
//! - **Application**: Ports and managers
//!   - `ports`: strategy traits per exchange
//!   - `strategy_set`: validated strategy bundles
//!   - `services`: `StreamingConnectionManager`, `RequestExecutionManager`
//!
//! - **Infrastructure**: Adapters
//!   - `websocket`: tokio-tungstenite connection
//!   - `http`: pooled reqwest transport
//!   - `rate_limit`, `retry`, `classifier`: default strategies
//!   - `heartbeat`: keep-alive scheduling
//!   - `config`, `telemetry`, `metrics`: ambient stack
//!
//! # Data Flow
//!
//! ```text
//! Exchange WS ──► Connection ──► queue ──► MessageParser ──► MessageHandler
//!
//! caller ──► RateLimiter ──► RequestPreparer ──► Authenticator ──► HttpTransport ──► Exchange REST
//!                                   ▲                                    │
//!                                   └──── RetryPolicy ◄── Classifier ◄───┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Transport data model with no I/O.
pub mod domain;

/// Application layer - Strategy ports and the managers.
pub mod application;

/// Infrastructure layer - Adapters and the ambient stack.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Managers
pub use application::services::{RequestExecutionManager, StreamingConnectionManager};

// Strategies
pub use application::ports::{
    Authenticator, Connection, ConnectionStateListener, ConnectionStrategy, ExceptionClassifier,
    HttpTransport, MessageHandler, MessageParser, Permit, RateLimiter, RequestPreparer,
    RetryPolicy, SubscriptionStrategy,
};
pub use application::strategy_set::{RequestStrategySet, StreamingStrategySet};

// Domain types
pub use domain::connection::{ConnectionContext, ConnectionState, ReconnectionPolicy};
pub use domain::error::{
    ErrorKind, RequestError, StrategyError, TransportError, TransportResult,
};
pub use domain::message::{
    InboundFrame, MessageKind, OutboundMessage, ParsedMessage, RawFrame, SubscriptionAction,
    SubscriptionParams,
};
pub use domain::metrics::{PerformanceMetrics, PerformanceSummary};
pub use domain::request::{
    AuthenticationData, Headers, HttpMethod, HttpResponse, PerformanceTargets, PreparedRequest,
    RateLimitContext, RequestContext, RequestOptions, RequestParams,
};

// Infrastructure adapters
pub use infrastructure::classifier::HttpStatusClassifier;
pub use infrastructure::config::{RequestSettings, StreamingSettings, TransportSettings};
pub use infrastructure::http::ReqwestTransport;
pub use infrastructure::rate_limit::TokenBucketRateLimiter;
pub use infrastructure::retry::{ExponentialBackoffRetry, RetryConfig};
pub use infrastructure::websocket::WebSocketConnection;
