//! Transport abstraction traits for the SimplePush client.
//!
//! The agent only needs open/close/send/receive of text frames, so the
//! traits stay that small. Frames are passed through verbatim; decoding is
//! the protocol layer's job.

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be opened.
    #[error("Connect to {url} failed: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] simplepush_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a connect failure for `url`.
    #[must_use]
    pub fn connect_failed(url: impl Into<String>, reason: impl ToString) -> Self {
        TransportError::ConnectFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// A transport that can open connections to a push server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `url`.
    ///
    /// Resolves once the connection is open and ready to send.
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// The sending half of an open connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// The receiving half of an open connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next text frame.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;
}
