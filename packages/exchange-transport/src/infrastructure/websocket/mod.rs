//! WebSocket Connection Adapter
//!
//! [`Connection`] over `tokio-tungstenite` with rustls. Native ping/pong is
//! answered by tungstenite itself; only data frames surface.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::Connection;
use crate::domain::connection::ABNORMAL_CLOSURE;
use crate::domain::error::{TransportError, TransportResult};
use crate::domain::message::{OutboundMessage, RawFrame};

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the ring crypto provider for rustls, once per process.
///
/// A provider installed elsewhere first is left in place.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

/// A live WebSocket connection.
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
}

impl WebSocketConnection {
    /// Connect to `url`, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] if the handshake does not finish
    /// in time, or [`TransportError::Connection`] if it fails.
    pub async fn connect(url: &str, timeout: Duration) -> TransportResult<Self> {
        install_crypto_provider();

        let (stream, response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| TransportError::timeout("websocket connect", timeout))?
            .map_err(map_ws_error)?;

        tracing::debug!(url, status = %response.status(), "WebSocket connected");
        Ok(Self {
            stream,
            url: url.to_string(),
        })
    }

    /// Endpoint this connection was opened to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, frame: OutboundMessage) -> TransportResult<()> {
        let message = match frame {
            RawFrame::Text(text) => Message::text(text),
            RawFrame::Binary(bytes) => Message::binary(bytes),
        };
        self.stream.send(message).await.map_err(map_ws_error)
    }

    async fn next_frame(&mut self) -> TransportResult<RawFrame> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Err(TransportError::ConnectionClosed {
                    code: None,
                    reason: "stream ended".to_string(),
                });
            };

            match message.map_err(map_ws_error)? {
                Message::Text(text) => return Ok(RawFrame::Text(text.to_string())),
                Message::Binary(bytes) => return Ok(RawFrame::Binary(bytes.to_vec())),
                Message::Close(frame) => return Err(closed(frame)),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_ws_error(e)),
        }
    }
}

fn closed(frame: Option<CloseFrame>) -> TransportError {
    match frame {
        Some(frame) => TransportError::ConnectionClosed {
            code: Some(u16::from(frame.code)),
            reason: frame.reason.to_string(),
        },
        None => TransportError::ConnectionClosed {
            code: None,
            reason: "close frame without status".to_string(),
        },
    }
}

fn map_ws_error(error: WsError) -> TransportError {
    match &error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionClosed {
            code: None,
            reason: error.to_string(),
        },
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::ConnectionClosed {
                code: Some(ABNORMAL_CLOSURE),
                reason: "reset without closing handshake".to_string(),
            }
        }
        WsError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            TransportError::ConnectionClosed {
                code: Some(ABNORMAL_CLOSURE),
                reason: error.to_string(),
            }
        }
        _ => TransportError::Connection(error.to_string()),
    }
}
