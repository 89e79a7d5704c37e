//! Codec for encoding and decoding SimplePush messages.
//!
//! Each transport frame carries exactly one JSON object, so there is no
//! length prefix: a frame is the message.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::messages::{ClientMessage, ServerMessage};

/// Maximum frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Field that selects the message shape.
pub const MESSAGE_TYPE_FIELD: &str = "messageType";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Well-formed JSON that is not a protocol message.
    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// Encode a client message to a text frame.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(message: &ClientMessage) -> Result<String, ProtocolError> {
    encode_message(message)
}

/// Decode a server message from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, not JSON, or not a known message.
pub fn decode(frame: &str) -> Result<ServerMessage, ProtocolError> {
    from_value(decode_value(frame)?)
}

/// Parse a text frame into its raw JSON object.
///
/// The object is guaranteed to carry a string `messageType`.
///
/// # Errors
///
/// Returns an error if the frame is too large, not JSON, or lacks a type.
pub fn decode_value(frame: &str) -> Result<Value, ProtocolError> {
    check_size(frame.len())?;

    let value: Value = serde_json::from_str(frame).map_err(ProtocolError::Decode)?;
    match value.get(MESSAGE_TYPE_FIELD) {
        Some(Value::String(_)) => Ok(value),
        Some(_) => Err(ProtocolError::Invalid(format!(
            "{MESSAGE_TYPE_FIELD} must be a string"
        ))),
        None => Err(ProtocolError::Invalid(format!(
            "missing {MESSAGE_TYPE_FIELD}"
        ))),
    }
}

/// Convert a raw JSON object into a server message.
///
/// # Errors
///
/// Returns an error if the object does not match any server message shape.
pub fn from_value(value: Value) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_value(value).map_err(ProtocolError::Decode)
}

/// Encode a server message. Used by servers and test peers.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode_server(message: &ServerMessage) -> Result<String, ProtocolError> {
    encode_message(message)
}

/// Decode a client message. Used by servers and test peers.
///
/// # Errors
///
/// Returns an error if the frame is too large or not a client message.
pub fn decode_client(frame: &str) -> Result<ClientMessage, ProtocolError> {
    decode_message(frame)
}

fn encode_message<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(message).map_err(ProtocolError::Encode)?;
    check_size(text.len())?;
    Ok(text)
}

fn decode_message<T: DeserializeOwned>(frame: &str) -> Result<T, ProtocolError> {
    check_size(frame.len())?;
    serde_json::from_str(frame).map_err(ProtocolError::Decode)
}

fn check_size(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(())
}
