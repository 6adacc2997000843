//! # gamex-session
//!
//! The session coordinator for Gamex: who is the moderator, who has joined,
//! whose turn it is, and how game messages move between peers.
//!
//! ## Topology
//!
//! Sessions form a star. The moderator (the peer that created the room)
//! holds one connection per guest; each guest holds exactly one
//! connection, to the moderator. Only the moderator mutates the roster and
//! the turn order. Guests apply what it broadcasts.
//!
//! ```text
//!            ┌──────── guest A
//! moderator ─┼──────── guest B
//!            └──────── guest C
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! spawn ─► initialize ─► create_room ──────────────► Active ─► disconnect
//!                    └─► join_room ─(Welcome)─────↗
//!                                 └─(fails)─► Idle (retry)
//! ```
//!
//! Everything observable comes out of the [`EventDispatcher`] returned by
//! [`SessionHandle::events`].
//!
//! [`EventDispatcher`]: gamex_events::EventDispatcher

mod config;
mod coordinator;
mod error;
mod handle;
mod link;
mod referee;
mod registry;
mod roster;

pub use config::{SessionConfig, SessionState};
pub use coordinator::SessionView;
pub use error::{ErrorClass, SessionError};
pub use handle::{RoomScan, SessionHandle};
pub use referee::Referee;
pub use registry::ConnectionState;
