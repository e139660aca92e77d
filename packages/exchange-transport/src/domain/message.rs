//! Message Envelope
//!
//! Raw wire frames and the parsed envelope handed to the application.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// One data frame on the streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Create a text frame.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Frame contents as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Text contents, if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A frame sent to the exchange.
pub type OutboundMessage = RawFrame;

/// A frame received from the exchange, stamped on arrival.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// The frame as received.
    pub raw: RawFrame,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

impl InboundFrame {
    /// Stamp a frame with the current time.
    #[must_use]
    pub fn new(raw: RawFrame) -> Self {
        Self {
            raw,
            received_at: Utc::now(),
        }
    }
}

/// Category of a parsed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Order book snapshot or delta.
    Orderbook,
    /// Public trade.
    Trade,
    /// Ticker update.
    Ticker,
    /// Account balance update.
    Balance,
    /// Order lifecycle update.
    Order,
    /// Exchange keep-alive.
    Heartbeat,
    /// Subscription confirmation.
    SubscriptionAck,
    /// Exchange-reported error.
    Error,
    /// Recognised frame with no specific category.
    Unclassified,
}

impl MessageKind {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Orderbook => "orderbook",
            Self::Trade => "trade",
            Self::Ticker => "ticker",
            Self::Balance => "balance",
            Self::Order => "order",
            Self::Heartbeat => "heartbeat",
            Self::SubscriptionAck => "subscription_ack",
            Self::Error => "error",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Parsed message handed to the application callback.
///
/// The payload is shared, never copied or mutated by the transport.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Message category.
    pub kind: MessageKind,
    /// Exchange stream or channel identifier.
    pub stream_id: Option<String>,
    /// Decoded payload.
    pub payload: Arc<Value>,
    /// Arrival time of the underlying frame.
    pub received_at: DateTime<Utc>,
}

impl ParsedMessage {
    /// Wrap a decoded payload.
    #[must_use]
    pub fn new(kind: MessageKind, payload: Value, received_at: DateTime<Utc>) -> Self {
        Self::from_shared(kind, Arc::new(payload), received_at)
    }

    /// Wrap an already shared payload.
    #[must_use]
    pub const fn from_shared(
        kind: MessageKind,
        payload: Arc<Value>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            stream_id: None,
            payload,
            received_at,
        }
    }

    /// Set the stream identifier.
    #[must_use]
    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }
}

/// Direction of a subscription change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Start receiving.
    Subscribe,
    /// Stop receiving.
    Unsubscribe,
}

/// Exchange-specific subscription parameters.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionParams {
    /// Channels to apply to every item.
    pub channels: Vec<String>,
    /// Free-form extras.
    pub extra: HashMap<String, Value>,
}

impl SubscriptionParams {
    /// Parameters with the given channels.
    #[must_use]
    pub fn with_channels(channels: Vec<String>) -> Self {
        Self {
            channels,
            extra: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_accessors() {
        let text = RawFrame::text("ping");
        assert_eq!(text.as_text(), Some("ping"));
        assert_eq!(text.len(), 4);

        let binary = RawFrame::Binary(vec![1, 2, 3]);
        assert_eq!(binary.as_text(), None);
        assert_eq!(binary.as_bytes(), &[1, 2, 3]);
        assert!(!binary.is_empty());
    }

    #[test]
    fn parsed_message_shares_payload() {
        let payload = Arc::new(serde_json::json!({"p": "1.0"}));
        let msg = ParsedMessage::from_shared(MessageKind::Trade, Arc::clone(&payload), Utc::now())
            .with_stream_id("btcusdt@trade");
        let cloned = msg.clone();
        assert!(Arc::ptr_eq(&cloned.payload, &payload));
        assert_eq!(cloned.stream_id.as_deref(), Some("btcusdt@trade"));
    }

    #[test]
    fn subscription_params_start_without_extras() {
        let params = SubscriptionParams::with_channels(vec!["trade".to_string()]);
        assert_eq!(params.channels, vec!["trade".to_string()]);
        assert!(params.extra.is_empty());
    }
}
