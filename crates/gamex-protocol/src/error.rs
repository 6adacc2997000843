//! Error types for the protocol layer.
//!
//! Each crate in Gamex defines its own error enum. When you see a
//! `ProtocolError`, you know the problem is in the bytes or in a room
//! code, not in networking or turn order.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The bytes could not be turned into an envelope.
    ///
    /// Covers malformed JSON, missing fields, unknown message kinds, and
    /// envelopes stamped with a protocol version we don't speak. Receivers
    /// drop the frame and carry on.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A room code that can never locate a moderator.
    #[error("invalid room code: {0}")]
    InvalidRoomCode(String),
}
