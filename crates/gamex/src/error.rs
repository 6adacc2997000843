//! Unified error type for Gamex.

use gamex_protocol::ProtocolError;
use gamex_scoring::InvalidGame;
use gamex_session::SessionError;
use gamex_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum GamexError {
    /// A channel failed (open, send, accept).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame or room code didn't parse.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session refused or failed an operation.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A game snapshot can't be played.
    #[error(transparent)]
    Scoring(#[from] InvalidGame),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: GamexError = TransportError::Unreachable("m-1".into()).into();
        assert!(matches!(err, GamexError::Transport(_)));
        assert!(err.to_string().contains("m-1"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: GamexError = ProtocolError::InvalidRoomCode("empty".into()).into();
        assert!(matches!(err, GamexError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err: GamexError = SessionError::Closed.into();
        assert!(matches!(err, GamexError::Session(SessionError::Closed)));
        assert_eq!(err.to_string(), "session closed");
    }

    #[test]
    fn test_from_invalid_game() {
        let err: GamexError = InvalidGame(vec!["need at least 2 players".into()]).into();
        assert!(matches!(err, GamexError::Scoring(_)));
        assert!(err.to_string().contains("2 players"));
    }
}
