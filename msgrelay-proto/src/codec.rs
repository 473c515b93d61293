//! JSON serialization for the msgrelay wire protocol.
//!
//! Each WebSocket frame carries exactly one [`Message`] encoded as a JSON
//! object. Text and binary frames are both accepted on decode; the server
//! always encodes to text.

use crate::message::Message;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload is not a JSON object of the message shape.
    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Encodes a [`Message`] into a JSON string.
///
/// # Errors
///
/// Returns `CodecError::Encode` if the message cannot be serialized.
pub fn encode(message: &Message) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::Encode)
}

/// Decodes a [`Message`] from a JSON text payload.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the text is not a valid message object.
pub fn decode_str(text: &str) -> Result<Message, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Decode)
}

/// Decodes a [`Message`] from raw bytes holding UTF-8 JSON.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the bytes are not a valid message object.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}
