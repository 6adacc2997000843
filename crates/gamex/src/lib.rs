//! # Gamex
//!
//! Peer-to-peer sessions for a turn-based party game.
//!
//! One player hosts a room and becomes its moderator; everyone else joins
//! with the room code. The moderator keeps the roster and the turn order,
//! relays each accepted choice, and calls the game once the referee says
//! it's over. No server sits in the middle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gamex::prelude::*;
//!
//! # async fn run() -> Result<(), GamexError> {
//! let (session, code) = PartyBuilder::new()
//!     .display_name("Mona")
//!     .host(WebSocketTransport::new("127.0.0.1:0"))
//!     .await?;
//! println!("share this code: {code}");
//!
//! session.events().subscribe(EventKind::GameOver, |event| {
//!     println!("{event:?}");
//! });
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! | Crate | Provides |
//! |---|---|
//! | `gamex-transport` | channel bindings (pairing, WebSocket) |
//! | `gamex-protocol` | wire types and codec |
//! | `gamex-events` | the event hub |
//! | `gamex-session` | the session coordinator |
//! | `gamex-scoring` | verdict and safe-play scoring |

mod builder;
mod error;
mod referee;

pub use builder::PartyBuilder;
pub use error::GamexError;
pub use referee::AuraReferee;

pub use gamex_events as events;
pub use gamex_protocol as protocol;
pub use gamex_scoring as scoring;
pub use gamex_session as session;
pub use gamex_transport as transport;

/// Everything needed to host or join a party.
pub mod prelude {
    pub use crate::{AuraReferee, GamexError, PartyBuilder};
    pub use gamex_events::{ErrorNotice, EventDispatcher, EventKind, SessionEvent};
    pub use gamex_protocol::{
        EmotionCategory, ErrorCode, GameMode, GameSummary, PeerId, Player,
        RoomCode, Verdict,
    };
    pub use gamex_session::{
        ErrorClass, Referee, SessionConfig, SessionError, SessionHandle,
        SessionState, SessionView,
    };
    pub use gamex_transport::{
        PairingMedium, PairingTransport, Transport, WebSocketTransport,
    };
}
