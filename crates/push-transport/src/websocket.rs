//! WebSocket transport implementation.
//!
//! This module provides a WebSocket client transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use simplepush_protocol::{ProtocolError, MAX_FRAME_SIZE};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, trace, warn};

use crate::traits::{FrameSink, FrameStream, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_FRAME_SIZE,
        }
    }
}

/// WebSocket client transport.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport with default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new WebSocket transport with a custom config.
    #[must_use]
    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        let (ws, response) = connect_async(url).await.map_err(|e| {
            error!(url = %url, error = %e, "WebSocket connect failed");
            TransportError::connect_failed(url, e)
        })?;

        debug!(url = %url, status = %response.status(), "WebSocket connected");

        let (sink, stream) = ws.split();
        let writer = WebSocketWriter { sink, closed: false };
        let reader = WebSocketReader {
            stream,
            max_message_size: self.config.max_message_size,
        };
        Ok((Box::new(writer), Box::new(reader)))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Sending half of a WebSocket connection.
pub struct WebSocketWriter {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WebSocketWriter {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        trace!(bytes = frame.len(), "Sending text frame");
        self.sink
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(()); // Already closed
        }
        self.closed = true;

        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }
}

/// Receiving half of a WebSocket connection.
pub struct WebSocketReader {
    stream: SplitStream<WsStream>,
    max_message_size: usize,
}

impl WebSocketReader {
    fn check_size(&self, len: usize) -> Result<(), TransportError> {
        if len > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                len, self.max_message_size
            );
            return Err(TransportError::Protocol(ProtocolError::FrameTooLarge(len)));
        }
        Ok(())
    }
}

#[async_trait]
impl FrameStream for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    // Some servers send JSON in binary frames
                    self.check_size(data.len())?;
                    let text = String::from_utf8(data).map_err(|e| {
                        TransportError::ReceiveFailed(format!("Binary frame is not UTF-8: {}", e))
                    })?;
                    return Ok(Some(text));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // tungstenite answers pings on its own
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, ignore
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    debug!("Connection closed");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}
