//! Session events for Gamex.
//!
//! The session coordinator never calls presentation code directly. It
//! publishes a [`SessionEvent`] to an [`EventDispatcher`], and whoever cares
//! (UI, sound, a test) subscribes by [`EventKind`].
//!
//! ```text
//! Session Coordinator ──publish──→ EventDispatcher ──fan-out──→ subscribers
//! ```

mod dispatcher;
mod event;

pub use dispatcher::{EventDispatcher, SubscriptionId};
pub use event::{ErrorNotice, EventKind, SessionEvent};
