//! Error types for the push agent.

use simplepush_core::StoreError;
use simplepush_protocol::ProtocolError;
use simplepush_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by the push agent.
#[derive(Debug, Error)]
pub enum PushError {
    /// The transport failed to open or dropped while connected.
    #[error("Connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    /// The server rejected a register request.
    #[error("Registration of channel {channel_id} rejected with status {status}")]
    Registration { channel_id: String, status: u16 },

    /// The server rejected an unregister request.
    #[error("Unregistration of channel {channel_id} rejected with status {status}")]
    Unregistration { channel_id: String, status: u16 },

    /// The operation needs an open connection.
    #[error("Not connected")]
    NotConnected,

    /// `connect` was called while a connection is open or opening.
    #[error("Already connected")]
    AlreadyConnected,

    /// Channel store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Wire encoding or decoding failure.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport failure outside of connect.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl PushError {
    /// Create a connection error for `url`.
    #[must_use]
    pub fn connection(url: impl Into<String>, reason: impl ToString) -> Self {
        PushError::Connection {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if the error is scoped to a single channel.
    #[must_use]
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            PushError::Registration { .. } | PushError::Unregistration { .. }
        )
    }
}
