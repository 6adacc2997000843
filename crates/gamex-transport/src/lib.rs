//! Transport abstraction layer for Gamex.
//!
//! A session talks to its peers through exactly one binding, chosen when the
//! session starts. Every binding offers the same capability set:
//!
//! - [`Transport::bind`] obtains the local address (the peer's identity)
//! - [`Transport::listen`] starts accepting channels (moderator side)
//! - [`Transport::open`] opens a channel to a remote address (guest side)
//! - [`Connection`] sends and receives byte frames and reports closure
//!
//! Bindings that can scan for nearby hosts additionally implement
//! [`Discover`].
//!
//! # Feature Flags
//!
//! - `websocket` (default): negotiated channel over WebSocket via
//!   `tokio-tungstenite`
//!
//! The in-process [`PairingMedium`] binding is always available.

mod error;
mod pairing;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use pairing::{
    Consent, PairingConnection, PairingDiscovery, PairingListener,
    PairingMedium, PairingTransport,
};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketListener, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counter for generating unique connection IDs across all bindings.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
///
/// Two connections to the same peer (say, before and after a reconnect)
/// always get different ids, which lets the registry ignore closure
/// notifications from a stale channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide id.
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The address of a participant's transport endpoint.
///
/// Opaque to everything above the transport. It stays stable for the
/// lifetime of one bound transport, and doubles as the player id on the wire.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps a raw address string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A peer-to-peer channel technology.
///
/// Implementations are cheap handles (`Clone`) around shared state so the
/// session can keep one copy while a join attempt drives another.
pub trait Transport: Clone + Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The listener produced by [`listen`](Self::listen).
    type Listener: Listener<Connection = Self::Connection>;

    /// Obtains the local address. Calling it again returns the same address.
    ///
    /// # Errors
    /// [`TransportError::Unsupported`] or [`TransportError::BindFailed`]
    /// when the binding cannot run here.
    fn bind(
        &self,
    ) -> impl Future<Output = Result<PeerId, TransportError>> + Send;

    /// Starts accepting incoming channels at the bound address.
    fn listen(
        &self,
    ) -> impl Future<Output = Result<Self::Listener, TransportError>> + Send;

    /// Opens a channel to `target`.
    ///
    /// # Errors
    /// - [`TransportError::Unreachable`]: nothing accepts at `target`
    /// - [`TransportError::PermissionDenied`]: the channel was refused
    /// - [`TransportError::Unsupported`]: the binding cannot run here
    fn open(
        &self,
        target: &PeerId,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// The passive side of a transport. Dropping it stops accepting.
pub trait Listener: Send + 'static {
    /// The connection type handed out on accept.
    type Connection: Connection;

    /// Waits for and accepts the next incoming channel.
    ///
    /// Returns [`TransportError::Shutdown`] once the listener can never
    /// produce another connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A single channel that can send and receive byte frames.
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the remote peer.
    ///
    /// Returns [`TransportError::ChannelClosed`] after either side closed.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the channel is closed, whether the local or
    /// the remote side closed it.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the channel. Closing twice is a no-op.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the address of the remote peer.
    fn peer(&self) -> &PeerId;
}

/// A binding that can scan for nearby hosts advertising the session service.
pub trait Discover: Transport {
    /// The scan produced by [`discover`](Self::discover).
    type Discovery: Discovery;

    /// Starts a new scan.
    ///
    /// Nothing happens until the first call to [`Discovery::next`], and each
    /// call starts over from scratch.
    fn discover(&self) -> Self::Discovery;
}

/// A lazy, finite sequence of candidate addresses.
///
/// Dropping a scan part-way through releases everything it holds.
pub trait Discovery: Send + 'static {
    /// Returns the next candidate, or `None` once the scan is exhausted.
    fn next(&mut self) -> impl Future<Output = Option<PeerId>> + Send;
}
