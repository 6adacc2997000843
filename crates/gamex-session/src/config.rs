//! Session configuration and state machine.

use std::time::Duration;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a guest waits for `Welcome` after starting a join. The clock
    /// starts before the channel is opened.
    pub handshake_timeout: Duration,

    /// Maximum roster size, moderator included. Further joins are answered
    /// with `RoomFull`.
    pub max_players: usize,

    /// Capacity of the coordinator's command channel.
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            max_players: 8,
            command_buffer: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The lifecycle state of a session.
///
/// ```text
/// Uninitialized → Idle → Hosting ──────→ Active → Closed
///                   ↑  ↘ Joining ─────↗
///                   └──────┘ (attempt failed)
/// ```
///
/// Any state can fall straight to `Closed` on teardown. `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Idle,
    Hosting,
    Joining,
    Active,
    Closed,
}

impl SessionState {
    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        use SessionState::*;
        match (self, target) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Uninitialized, Idle) => true,
            (Idle, Hosting | Joining) => true,
            (Hosting, Active) => true,
            (Joining, Active | Idle) => true,
            _ => false,
        }
    }

    /// Returns `true` once the session is connected, as moderator or guest.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Idle => write!(f, "Idle"),
            Self::Hosting => write!(f, "Hosting"),
            Self::Joining => write!(f, "Joining"),
            Self::Active => write!(f, "Active"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
