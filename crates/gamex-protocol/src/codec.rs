//! Codec trait and implementations for serializing/deserializing envelopes.
//!
//! The protocol layer doesn't care HOW messages are serialized, it only
//! needs something that implements [`Codec`]. Currently we provide
//! [`JsonCodec`], which keeps frames readable in logs.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Envelope, ProtocolError, PROTOCOL_VERSION};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `encode`/`decode` are the format primitives. Peers exchange envelopes
/// through [`encode_envelope`](Self::encode_envelope) and
/// [`decode_envelope`](Self::decode_envelope), which add the version check.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::MalformedPayload` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;

    /// Serializes an envelope for the wire.
    fn encode_envelope(
        &self,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.encode(envelope)
    }

    /// Parses a frame received from a peer.
    ///
    /// The version is read first, on its own, so a frame from a newer peer
    /// is reported as a version mismatch even if its message kind is one we
    /// have never heard of.
    ///
    /// # Errors
    /// `ProtocolError::MalformedPayload` for garbage, unknown kinds, and
    /// any version other than [`PROTOCOL_VERSION`].
    fn decode_envelope(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        let header: VersionHeader = self.decode(data)?;
        if header.version != PROTOCOL_VERSION {
            return Err(ProtocolError::MalformedPayload(format!(
                "protocol version {} not supported (expected {PROTOCOL_VERSION})",
                header.version
            )));
        }
        self.decode(data)
    }
}

/// Just enough of an envelope to read its version.
#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// This is behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use gamex_protocol::{Codec, Envelope, JsonCodec, Message, PeerId};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::new(Message::Join {
///     player_id: PeerId::from("g-1"),
///     display_name: "Gina".into(),
/// });
///
/// let bytes = codec.encode_envelope(&envelope).unwrap();
/// let decoded = codec.decode_envelope(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data)
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }
}
