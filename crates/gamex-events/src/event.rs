//! The closed set of events a session publishes.

use std::fmt;

use gamex_protocol::{
    ChoiceRecord, ErrorCode, GameMode, GameSnapshot, GameSummary, PeerId,
    Player,
};

/// A human-readable failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Something that happened in a session.
///
/// Payloads are owned snapshots; holding on to one never observes later
/// roster changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A guest finished the join handshake (moderator side).
    PlayerConnected(Player),
    /// A player's connection closed.
    PlayerDisconnected { player_id: PeerId, was_moderator: bool },
    /// The roster changed; carries the whole new roster.
    RosterUpdated(Vec<Player>),
    /// A choice was accepted by the moderator.
    ChoiceReceived(ChoiceRecord),
    /// A game began.
    GameStarted(GameSnapshot),
    /// The moderator picked a mode for the next game.
    ModeChanged { mode: GameMode, total_rounds: u32 },
    /// The turn moved on.
    NextTurn {
        current_player_index: usize,
        current_player_id: PeerId,
    },
    /// The game ended.
    GameOver(GameSummary),
    /// A player changed their display name.
    NameUpdated { player_id: PeerId, display_name: String },
    /// Something failed; see [`ErrorNotice::code`].
    Error(ErrorNotice),
}

impl SessionEvent {
    /// Builds an [`SessionEvent::Error`].
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice {
            code,
            message: message.into(),
        })
    }

    /// Returns the kind this event is filed under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PlayerConnected(_) => EventKind::PlayerConnected,
            Self::PlayerDisconnected { .. } => EventKind::PlayerDisconnected,
            Self::RosterUpdated(_) => EventKind::RosterUpdated,
            Self::ChoiceReceived(_) => EventKind::ChoiceReceived,
            Self::GameStarted(_) => EventKind::GameStarted,
            Self::ModeChanged { .. } => EventKind::ModeChanged,
            Self::NextTurn { .. } => EventKind::NextTurn,
            Self::GameOver(_) => EventKind::GameOver,
            Self::NameUpdated { .. } => EventKind::NameUpdated,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// The kinds subscribers can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlayerConnected,
    PlayerDisconnected,
    RosterUpdated,
    ChoiceReceived,
    GameStarted,
    ModeChanged,
    NextTurn,
    GameOver,
    NameUpdated,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PlayerConnected => "playerConnected",
            Self::PlayerDisconnected => "playerDisconnected",
            Self::RosterUpdated => "rosterUpdated",
            Self::ChoiceReceived => "choiceReceived",
            Self::GameStarted => "gameStarted",
            Self::ModeChanged => "modeChanged",
            Self::NextTurn => "nextTurn",
            Self::GameOver => "gameOver",
            Self::NameUpdated => "nameUpdated",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_matches_variant() {
        let event = SessionEvent::PlayerDisconnected {
            player_id: PeerId::from("g-1"),
            was_moderator: false,
        };
        assert_eq!(event.kind(), EventKind::PlayerDisconnected);

        let event = SessionEvent::error(ErrorCode::NotYourTurn, "wait");
        assert_eq!(event.kind(), EventKind::Error);
    }

    #[test]
    fn test_event_kind_display_uses_event_names() {
        assert_eq!(EventKind::ChoiceReceived.to_string(), "choiceReceived");
        assert_eq!(EventKind::Error.to_string(), "error");
    }

    #[test]
    fn test_error_notice_display() {
        let notice = ErrorNotice {
            code: ErrorCode::RoomNotFound,
            message: "no moderator at m-9".into(),
        };
        assert_eq!(notice.to_string(), "RoomNotFound: no moderator at m-9");
    }
}
