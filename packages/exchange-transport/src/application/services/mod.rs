//! Application Services
//!
//! - `StreamingConnectionManager`: persistent streaming connection lifecycle
//! - `RequestExecutionManager`: rate-limited REST calls with retries
//!
//! The recorders and the inbound queue are internal to the managers.

mod message_queue;
mod recorder;
mod request;
mod streaming;

pub use message_queue::{MessageQueue, PushOutcome};
pub use recorder::{RequestMetricsRecorder, StreamMetricsRecorder};
pub use request::RequestExecutionManager;
pub use streaming::StreamingConnectionManager;
