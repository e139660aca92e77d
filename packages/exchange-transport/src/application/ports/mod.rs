//! Port Interfaces
//!
//! Strategy contracts each exchange integration implements. The managers
//! depend only on these traits.
//!
//! ## Streaming
//!
//! - `Connection`: one live streaming socket
//! - `ConnectionStrategy`: connect, authenticate, reconnect decisions
//! - `SubscriptionStrategy`: subscribe/unsubscribe frames
//! - `MessageParser`: frame decoding and classification
//! - `MessageHandler`, `ConnectionStateListener`: upward callbacks
//!
//! ## Request/Response
//!
//! - `RequestPreparer`, `Authenticator`, `RateLimiter`, `RetryPolicy`,
//!   `ExceptionClassifier`
//! - `HttpTransport`: the pooled HTTP surface

mod request;
mod streaming;

pub use request::{
    Authenticator, ExceptionClassifier, HttpTransport, Permit, RateLimiter, RequestPreparer,
    RetryPolicy,
};
pub use streaming::{
    Connection, ConnectionStateListener, ConnectionStrategy, MessageHandler, MessageParser,
    SubscriptionStrategy,
};
