//! Streaming strategy ports.

use async_trait::async_trait;

use crate::domain::connection::{ConnectionContext, ConnectionState, ReconnectionPolicy};
use crate::domain::error::{ErrorKind, TransportError, TransportResult};
use crate::domain::message::{
    InboundFrame, OutboundMessage, ParsedMessage, RawFrame, SubscriptionAction, SubscriptionParams,
};

/// One live streaming socket.
///
/// `next_frame` must be cancel-safe: the connection task polls it inside
/// `tokio::select!` and may drop the future between frames.
#[async_trait]
pub trait Connection: Send {
    /// Send one frame.
    async fn send(&mut self, frame: OutboundMessage) -> TransportResult<()>;

    /// Wait for the next data frame.
    ///
    /// Control frames are handled internally. A remote close or end of stream
    /// is reported as [`TransportError::ConnectionClosed`].
    async fn next_frame(&mut self) -> TransportResult<RawFrame>;

    /// Close the socket.
    async fn close(&mut self) -> TransportResult<()>;
}

/// Exchange-specific connection establishment.
#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    /// Open a connection to `context.url`.
    async fn connect(&self, context: &ConnectionContext) -> TransportResult<Box<dyn Connection>>;

    /// Run the authentication exchange. `Ok(false)` means rejected.
    async fn authenticate(
        &self,
        connection: &mut dyn Connection,
        context: &ConnectionContext,
    ) -> TransportResult<bool>;

    /// Reconnection behavior for this exchange.
    fn reconnection_policy(&self, context: &ConnectionContext) -> ReconnectionPolicy {
        ReconnectionPolicy::from_context(context)
    }

    /// Whether a disconnect caused by `error` should be retried.
    fn should_reconnect(&self, error: &TransportError) -> bool {
        !matches!(
            error.kind(),
            ErrorKind::AuthenticationFailed | ErrorKind::ParseError | ErrorKind::ClientError
        )
    }

    /// Application-level keep-alive frame, if the exchange needs one.
    fn heartbeat_payload(&self, context: &ConnectionContext) -> Option<OutboundMessage> {
        context.keepalive_payload.clone()
    }
}

/// Builds subscribe/unsubscribe frames.
pub trait SubscriptionStrategy: Send + Sync {
    /// Frames that apply `action` to `items`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frames cannot be encoded.
    fn build_messages(
        &self,
        action: SubscriptionAction,
        items: &[String],
        params: &SubscriptionParams,
    ) -> TransportResult<Vec<OutboundMessage>>;
}

/// Decodes and classifies inbound frames.
pub trait MessageParser: Send + Sync {
    /// Parse one frame. `Ok(None)` means the frame carries nothing to dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Parse`] for undecodable frames.
    fn parse(&self, frame: &InboundFrame) -> TransportResult<Option<ParsedMessage>>;
}

/// Receives parsed messages in arrival order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    async fn on_message(&self, message: ParsedMessage);
}

/// Observes connection lifecycle changes.
pub trait ConnectionStateListener: Send + Sync {
    /// Called on every state transition.
    fn on_state_change(&self, previous: ConnectionState, current: ConnectionState);

    /// Called once when the connection enters [`ConnectionState::Error`].
    fn on_error(&self, error: &TransportError) {
        let _ = error;
    }
}
