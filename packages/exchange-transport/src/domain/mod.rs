//! Domain Layer - Transport data model.
//!
//! Connection state and parameters, the parsed message envelope, request
//! vocabulary, performance snapshots, and the error taxonomy. No I/O lives
//! here.

/// Connection state, context, and reconnection policy.
pub mod connection;

/// Error taxonomy shared by both managers.
pub mod error;

/// Wire frames and the parsed message envelope.
pub mod message;

/// Performance snapshots and the latency window.
pub mod metrics;

/// Request/response vocabulary.
pub mod request;
