//! Application Layer - Strategy ports and the transport managers.
//!
//! Exchange integrations implement the ports; the services compose them into
//! a streaming connection manager and a request execution manager.

/// Strategy traits implemented per exchange.
pub mod ports;

/// Validated, immutable strategy bundles.
pub mod strategy_set;

/// Streaming and request managers.
pub mod services;
