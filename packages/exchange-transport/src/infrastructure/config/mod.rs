//! Configuration Module
//!
//! Settings for the streaming and request managers.

mod settings;

pub use settings::{ConfigError, RequestSettings, StreamingSettings, TransportSettings};
