//! Error types for the session layer.

use std::time::Duration;

use gamex_events::ErrorNotice;
use gamex_protocol::{ErrorCode, PeerId, ProtocolError, RoomCode};
use gamex_transport::TransportError;

use crate::SessionState;

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The session is over and is now `Closed`.
    Session,
    /// One join attempt failed. The session is back in `Idle` and the
    /// caller may retry.
    Attempt,
    /// One message or request was refused. Nothing else changed.
    Message,
}

/// Errors that can occur in a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The binding could not obtain a local address.
    #[error("transport failed to initialize: {0}")]
    TransportInitFailed(#[source] TransportError),

    /// Nothing answers at the address behind the room code.
    #[error("room {0} not found")]
    RoomNotFound(RoomCode),

    /// The channel to the moderator was refused.
    #[error("permission denied joining room {0}")]
    PermissionDenied(RoomCode),

    /// The moderator never sent `Welcome`.
    #[error("no welcome from the moderator within {0:?}")]
    HandshakeTimeout(Duration),

    /// The channel closed, or the attempt was cancelled, before `Welcome`.
    #[error("join handshake aborted: {0}")]
    HandshakeAborted(String),

    /// The moderator answered the join with an `Error` message.
    #[error("join rejected ({code}): {message}")]
    Rejected { code: ErrorCode, message: String },

    /// The operation isn't available in the current state.
    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: SessionState },

    /// A choice was made out of turn.
    #[error("not your turn; waiting for {expected}")]
    NotYourTurn { expected: PeerId },

    /// The referee refused to start the game.
    #[error("game rejected: {0}")]
    GameRejected(String),

    /// A peer sent something its role may not send, or sent it too early.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A roster replacement broke a roster invariant.
    #[error("invalid roster: {0}")]
    InvalidRoster(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session is closed; its coordinator has stopped.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Returns how far this error reaches.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TransportInitFailed(_) | Self::Closed => ErrorClass::Session,
            Self::RoomNotFound(_)
            | Self::PermissionDenied(_)
            | Self::HandshakeTimeout(_)
            | Self::HandshakeAborted(_)
            | Self::Rejected { .. } => ErrorClass::Attempt,
            Self::InvalidState { .. }
            | Self::NotYourTurn { .. }
            | Self::GameRejected(_)
            | Self::ProtocolViolation(_)
            | Self::InvalidRoster(_)
            | Self::Transport(_)
            | Self::Protocol(_) => ErrorClass::Message,
        }
    }

    /// Returns the code reported in error events for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TransportInitFailed(_) => ErrorCode::TransportInitFailed,
            Self::RoomNotFound(_) => ErrorCode::RoomNotFound,
            Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Self::HandshakeTimeout(_) => ErrorCode::HandshakeTimeout,
            Self::HandshakeAborted(_) => ErrorCode::HandshakeAborted,
            Self::Rejected { code, .. } => *code,
            Self::NotYourTurn { .. } => ErrorCode::NotYourTurn,
            Self::GameRejected(_) => ErrorCode::GameRejected,
            Self::InvalidState { .. }
            | Self::ProtocolViolation(_)
            | Self::InvalidRoster(_) => ErrorCode::ProtocolViolation,
            Self::Protocol(_) => ErrorCode::MalformedPayload,
            Self::Transport(_) | Self::Closed => ErrorCode::TransportFailure,
        }
    }

    /// Builds the notice published in an `error` event for this error.
    pub fn notice(&self) -> ErrorNotice {
        ErrorNotice {
            code: self.code(),
            message: self.to_string(),
        }
    }
}
