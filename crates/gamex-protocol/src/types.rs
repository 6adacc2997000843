//! Core protocol types for the Gamex wire format.
//!
//! Every type here either travels between peers or is built directly from
//! something that did. The session layer owns the behavior. This module
//! only fixes the shapes.

use std::fmt;
use std::str::FromStr;

use gamex_transport::PeerId;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// The protocol version stamped on every envelope.
///
/// Receivers reject envelopes carrying any other version as malformed.
pub const PROTOCOL_VERSION: u32 = 1;

/// Longest room code we accept. Real addresses are far shorter; anything
/// longer is a paste accident.
pub const MAX_ROOM_CODE_LEN: usize = 128;

// ---------------------------------------------------------------------------
// RoomCode
// ---------------------------------------------------------------------------

/// The token a guest types in to find the moderator.
///
/// The code is the moderator's transport address itself, so deriving and
/// extracting are exact inverses:
///
/// ```rust
/// use gamex_protocol::{PeerId, RoomCode};
///
/// let moderator = PeerId::from("m-123");
/// let code = RoomCode::for_moderator(&moderator);
/// assert_eq!(code.extract_address(), moderator);
/// ```
///
/// Anyone holding the code can try to join, and a code can't be revoked
/// short of the moderator leaving.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Derives the room code for a moderator's address.
    pub fn for_moderator(moderator: &PeerId) -> Self {
        Self(moderator.as_str().to_owned())
    }

    /// Parses a code typed or pasted by a user.
    ///
    /// Surrounding whitespace is trimmed.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidRoomCode`] when the code is empty, contains
    /// whitespace, or is longer than [`MAX_ROOM_CODE_LEN`].
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let code = raw.trim();
        if code.is_empty() {
            return Err(ProtocolError::InvalidRoomCode(
                "room code is empty".into(),
            ));
        }
        if code.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidRoomCode(format!(
                "room code {code:?} contains whitespace"
            )));
        }
        if code.len() > MAX_ROOM_CODE_LEN {
            return Err(ProtocolError::InvalidRoomCode(format!(
                "room code is {} bytes, limit is {MAX_ROOM_CODE_LEN}",
                code.len()
            )));
        }
        Ok(Self(code.to_owned()))
    }

    /// Returns the moderator address this code points at.
    pub fn extract_address(&self) -> PeerId {
        PeerId::new(self.0.clone())
    }

    /// Returns the code as typed.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Players
// ---------------------------------------------------------------------------

/// A roster entry as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PeerId,
    pub display_name: String,
    pub is_moderator: bool,
}

/// A roster entry as seen by one particular peer.
///
/// Same as [`PlayerInfo`] plus `is_local`, which is true on exactly one
/// entry in every peer's roster: its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PeerId,
    pub display_name: String,
    pub is_local: bool,
    pub is_moderator: bool,
}

impl Player {
    /// Builds the local view of a wire entry.
    pub fn from_info(info: PlayerInfo, local: &PeerId) -> Self {
        Self {
            is_local: &info.id == local,
            id: info.id,
            display_name: info.display_name,
            is_moderator: info.is_moderator,
        }
    }

    /// Strips the peer-relative flag for sending.
    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            is_moderator: self.is_moderator,
        }
    }
}

// ---------------------------------------------------------------------------
// Game vocabulary
// ---------------------------------------------------------------------------

/// Difficulty picked by the moderator before the game starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Easy,
    Hard,
    Hardest,
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Easy => write!(f, "easy"),
            Self::Hard => write!(f, "hard"),
            Self::Hardest => write!(f, "hardest"),
        }
    }
}

/// The three choices a player can make on their turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionCategory {
    Love,
    Friendship,
    Passion,
}

impl EmotionCategory {
    /// Every category, in display order.
    pub const ALL: [Self; 3] = [Self::Love, Self::Friendship, Self::Passion];
}

impl fmt::Display for EmotionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Love => write!(f, "love"),
            Self::Friendship => write!(f, "friendship"),
            Self::Passion => write!(f, "passion"),
        }
    }
}

/// One accepted choice in the game log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRecord {
    pub player_id: PeerId,
    pub category: EmotionCategory,
    pub round: u32,
    /// Milliseconds since the Unix epoch, stamped by the chooser.
    pub timestamp: u64,
}

/// The game state the moderator broadcasts when a game starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub mode: GameMode,
    pub total_rounds: u32,
    pub players: Vec<PlayerInfo>,
    pub current_player_index: usize,
    pub choices: Vec<ChoiceRecord>,
}

/// Share of each category in a set of choices, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EmotionAverages {
    pub love: f64,
    pub friendship: f64,
    pub passion: f64,
}

impl EmotionAverages {
    /// Returns the share for one category.
    pub fn get(&self, category: EmotionCategory) -> f64 {
        match category {
            EmotionCategory::Love => self.love,
            EmotionCategory::Friendship => self.friendship,
            EmotionCategory::Passion => self.passion,
        }
    }
}

/// Whether the group hit the target balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Bingo,
    Replay,
}

/// Traffic-light reading of the safe-play score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyBand {
    Safe,
    Caution,
    Unsafe,
}

/// Final result carried by `GameOver`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub verdict: Verdict,
    pub reason: String,
    pub safe_score: f64,
    pub safety: SafetyBand,
    pub safety_label: String,
    pub global: EmotionAverages,
    pub completed_rounds: u32,
    pub total_rounds: u32,
    pub total_choices: usize,
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable reason attached to `Error` messages and error events.
///
/// The first five travel on the wire (moderator → guest). The rest only
/// ever appear in local error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NotYourTurn,
    RoomFull,
    ProtocolViolation,
    MalformedPayload,
    GameRejected,
    RoomNotFound,
    PermissionDenied,
    HandshakeTimeout,
    HandshakeAborted,
    TransportInitFailed,
    TransportFailure,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotYourTurn => "NotYourTurn",
            Self::RoomFull => "RoomFull",
            Self::ProtocolViolation => "ProtocolViolation",
            Self::MalformedPayload => "MalformedPayload",
            Self::GameRejected => "GameRejected",
            Self::RoomNotFound => "RoomNotFound",
            Self::PermissionDenied => "PermissionDenied",
            Self::HandshakeTimeout => "HandshakeTimeout",
            Self::HandshakeAborted => "HandshakeAborted",
            Self::TransportInitFailed => "TransportInitFailed",
            Self::TransportFailure => "TransportFailure",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Everything peers say to each other.
///
/// `#[serde(tag = "kind", content = "payload")]` produces "adjacently
/// tagged" JSON, so the kind is readable before the payload is parsed:
///   `{ "kind": "Choice", "payload": { "player_id": "g-1", ... } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Message {
    /// Guest → moderator: "Let me in."
    Join {
        player_id: PeerId,
        display_name: String,
    },

    /// Moderator → guest: "You're in." Completes the guest's handshake.
    Welcome {
        moderator_id: PeerId,
        moderator_name: String,
    },

    /// Moderator → guests: the full, ordered roster. Replaces whatever
    /// the guest had.
    RosterUpdate { players: Vec<PlayerInfo> },

    /// Moderator → guests: mode and round count picked for the next game.
    ModeSelected { mode: GameMode, total_rounds: u32 },

    /// Moderator → guests: a game begins.
    GameStart { snapshot: GameSnapshot },

    /// Guest → moderator, then moderator → all guests once accepted.
    Choice {
        player_id: PeerId,
        category: EmotionCategory,
        round: u32,
        timestamp: u64,
    },

    /// Moderator → guests: whose turn it is now.
    NextTurn {
        current_player_index: usize,
        current_player_id: PeerId,
    },

    /// Moderator → guests: the game ended.
    GameOver { summary: GameSummary },

    /// Any peer → everyone (guests route through the moderator).
    NameUpdate {
        player_id: PeerId,
        display_name: String,
    },

    /// Moderator → guest: your last message was refused.
    Error { code: ErrorCode, message: String },
}

impl Message {
    /// Returns the kind tag of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Join { .. } => MessageKind::Join,
            Self::Welcome { .. } => MessageKind::Welcome,
            Self::RosterUpdate { .. } => MessageKind::RosterUpdate,
            Self::ModeSelected { .. } => MessageKind::ModeSelected,
            Self::GameStart { .. } => MessageKind::GameStart,
            Self::Choice { .. } => MessageKind::Choice,
            Self::NextTurn { .. } => MessageKind::NextTurn,
            Self::GameOver { .. } => MessageKind::GameOver,
            Self::NameUpdate { .. } => MessageKind::NameUpdate,
            Self::Error { .. } => MessageKind::Error,
        }
    }
}

/// The fieldless tag of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Join,
    Welcome,
    RosterUpdate,
    ModeSelected,
    GameStart,
    Choice,
    NextTurn,
    GameOver,
    NameUpdate,
    Error,
}

impl MessageKind {
    /// Returns `true` for kinds only the moderator may originate.
    pub fn is_moderator_only(self) -> bool {
        matches!(
            self,
            Self::Welcome
                | Self::RosterUpdate
                | Self::ModeSelected
                | Self::GameStart
                | Self::NextTurn
                | Self::GameOver
                | Self::Error
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The top-level message wrapper. Every frame on the wire is an Envelope.
///
/// ```text
/// ┌──────────────────────────────────┐
/// │ version: 1                       │  ← rejected if we don't speak it
/// │ ┌──────────────────────────────┐ │
/// │ │ kind: "Choice"               │ │  ← tag first
/// │ │ payload: { player_id, ... }  │ │
/// │ └──────────────────────────────┘ │
/// └──────────────────────────────────┘
/// ```
///
/// Envelopes are immutable once built and forwarded verbatim, so the fields
/// are private.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    version: u32,
    message: Message,
}

impl Envelope {
    /// Wraps a message, stamping the current protocol version.
    pub fn new(message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message,
        }
    }

    /// Returns the protocol version this envelope was stamped with.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the kind tag of the carried message.
    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    /// Borrows the carried message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Consumes the envelope, returning the carried message.
    pub fn into_message(self) -> Message {
        self.message
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}

// =========================================================================
// Tests
// =========================================================================
