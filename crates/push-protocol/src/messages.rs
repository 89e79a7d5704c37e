//! Message types for the SimplePush protocol.
//!
//! Messages are JSON objects tagged by `messageType`. Field names follow the
//! wire exactly (`channelID`, `uaid`, `updates`), so the Rust names are
//! mapped with `serde(rename)`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status code the server uses for a successful channel operation.
pub const STATUS_OK: u16 = 200;

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Hello,
    Register,
    Unregister,
    Notification,
    Ack,
}

impl MessageType {
    /// The `messageType` value used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Hello => "hello",
            MessageType::Register => "register",
            MessageType::Unregister => "unregister",
            MessageType::Notification => "notification",
            MessageType::Ack => "ack",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single channel version update inside a `notification` batch.
///
/// This is the typed view handed to notification handlers. The batch itself
/// travels as raw JSON so the acknowledgment can echo it back unchanged even
/// when an entry does not parse as an `Update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Channel the update belongs to.
    #[serde(rename = "channelID")]
    pub channel_id: String,
    /// New channel version.
    pub version: i64,
    /// Any additional fields sent by the server.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Update {
    /// Create a new update with no extra fields.
    #[must_use]
    pub fn new(channel_id: impl Into<String>, version: i64) -> Self {
        Self {
            channel_id: channel_id.into(),
            version,
            extra: Map::new(),
        }
    }
}

impl From<Update> for Value {
    fn from(update: Update) -> Self {
        let mut object = update.extra;
        object.insert("channelID".to_string(), Value::String(update.channel_id));
        object.insert("version".to_string(), Value::from(update.version));
        Value::Object(object)
    }
}

/// A message sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum ClientMessage {
    /// Identity handshake, sent immediately after the transport opens.
    #[serde(rename = "hello")]
    Hello {
        /// Known user-agent identifier, or empty if none.
        uaid: String,
        /// Channels to resync, present only when `uaid` is known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channels: Option<Vec<String>>,
    },

    /// Request a channel registration.
    #[serde(rename = "register")]
    Register {
        #[serde(rename = "channelID")]
        channel_id: String,
    },

    /// Request a channel removal.
    #[serde(rename = "unregister")]
    Unregister {
        #[serde(rename = "channelID")]
        channel_id: String,
    },

    /// Acknowledge a whole notification batch.
    #[serde(rename = "ack")]
    Ack {
        /// The batch exactly as received.
        updates: Vec<Value>,
    },
}

impl ClientMessage {
    /// Get the message type.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::Hello { .. } => MessageType::Hello,
            ClientMessage::Register { .. } => MessageType::Register,
            ClientMessage::Unregister { .. } => MessageType::Unregister,
            ClientMessage::Ack { .. } => MessageType::Ack,
        }
    }

    /// Create a new Hello message.
    #[must_use]
    pub fn hello(uaid: impl Into<String>, channels: Option<Vec<String>>) -> Self {
        ClientMessage::Hello {
            uaid: uaid.into(),
            channels,
        }
    }

    /// Create a new Register message.
    #[must_use]
    pub fn register(channel_id: impl Into<String>) -> Self {
        ClientMessage::Register {
            channel_id: channel_id.into(),
        }
    }

    /// Create a new Unregister message.
    #[must_use]
    pub fn unregister(channel_id: impl Into<String>) -> Self {
        ClientMessage::Unregister {
            channel_id: channel_id.into(),
        }
    }

    /// Create a new Ack message echoing `updates`.
    #[must_use]
    pub fn ack<U: Into<Value>>(updates: impl IntoIterator<Item = U>) -> Self {
        ClientMessage::Ack {
            updates: updates.into_iter().map(Into::into).collect(),
        }
    }
}

/// A message sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum ServerMessage {
    /// Handshake reply carrying the authoritative user-agent identifier.
    #[serde(rename = "hello")]
    Hello { uaid: String },

    /// Result of a register request.
    #[serde(rename = "register")]
    Register {
        status: u16,
        #[serde(rename = "channelID")]
        channel_id: String,
        /// Missing on some failure replies.
        #[serde(default)]
        version: i64,
    },

    /// Result of an unregister request.
    #[serde(rename = "unregister")]
    Unregister {
        status: u16,
        #[serde(rename = "channelID")]
        channel_id: String,
    },

    /// A batch of channel updates, kept as raw JSON entries.
    #[serde(rename = "notification")]
    Notification { updates: Vec<Value> },
}

impl ServerMessage {
    /// Get the message type.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::Hello { .. } => MessageType::Hello,
            ServerMessage::Register { .. } => MessageType::Register,
            ServerMessage::Unregister { .. } => MessageType::Unregister,
            ServerMessage::Notification { .. } => MessageType::Notification,
        }
    }

    /// Create a new Hello reply.
    #[must_use]
    pub fn hello(uaid: impl Into<String>) -> Self {
        ServerMessage::Hello { uaid: uaid.into() }
    }

    /// Create a new Register reply.
    #[must_use]
    pub fn register(status: u16, channel_id: impl Into<String>, version: i64) -> Self {
        ServerMessage::Register {
            status,
            channel_id: channel_id.into(),
            version,
        }
    }

    /// Create a new Unregister reply.
    #[must_use]
    pub fn unregister(status: u16, channel_id: impl Into<String>) -> Self {
        ServerMessage::Unregister {
            status,
            channel_id: channel_id.into(),
        }
    }

    /// Create a new Notification message.
    #[must_use]
    pub fn notification(updates: Vec<Update>) -> Self {
        ServerMessage::Notification {
            updates: updates.into_iter().map(Value::from).collect(),
        }
    }
}
