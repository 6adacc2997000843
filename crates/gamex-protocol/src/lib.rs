//! Wire protocol for Gamex.
//!
//! Every frame between a moderator and its guests is one [`Envelope`]
//! wrapping a [`Message`]. This crate holds:
//!
//! - the game data model shared by all peers ([`Player`], [`GameSnapshot`],
//!   [`GameSummary`]) and the [`RoomCode`] guests join with;
//! - the [`Codec`] trait with its JSON implementation, [`JsonCodec`];
//! - [`ProtocolError`], raised for undecodable frames and bad room codes.
//!
//! Nothing here touches sockets or session state: the layer below moves
//! bytes, the layer above decides who may send what.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session (roster, turns)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ChoiceRecord, EmotionAverages, EmotionCategory, Envelope, ErrorCode,
    GameMode, GameSnapshot, GameSummary, Message, MessageKind, Player,
    PlayerInfo, RoomCode, SafetyBand, Verdict, MAX_ROOM_CODE_LEN,
    PROTOCOL_VERSION,
};

// Peer addresses double as player ids on the wire.
pub use gamex_transport::PeerId;
