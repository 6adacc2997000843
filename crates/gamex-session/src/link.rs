//! Background tasks that turn transport activity into coordinator input.
//!
//! Each connection gets a read pump; a hosting session also runs one
//! acceptor. Both only forward. All decisions happen in the coordinator.

use std::sync::Arc;

use gamex_protocol::PeerId;
use gamex_transport::{Connection, ConnectionId, Listener, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Transport activity, in arrival order per connection.
pub(crate) enum LinkEvent<C> {
    /// A guest opened a channel to us.
    Accepted(C),
    /// A frame arrived.
    Frame {
        peer: PeerId,
        conn: ConnectionId,
        bytes: Vec<u8>,
    },
    /// The channel closed or failed. Sent once per connection.
    Closed { peer: PeerId, conn: ConnectionId },
}

/// Spawns a task that forwards every frame from `conn`.
pub(crate) fn spawn_pump<C: Connection>(
    conn: Arc<C>,
    tx: mpsc::UnboundedSender<LinkEvent<C>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let peer = conn.peer().clone();
        let id = conn.id();
        loop {
            match conn.recv().await {
                Ok(Some(bytes)) => {
                    let frame = LinkEvent::Frame {
                        peer: peer.clone(),
                        conn: id,
                        bytes,
                    };
                    if tx.send(frame).is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    tracing::debug!(%peer, conn = %id, "channel closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::debug!(%peer, conn = %id, error = %e, "receive failed");
                    break;
                }
            }
        }
        let _ = tx.send(LinkEvent::Closed { peer, conn: id });
    })
}

/// Spawns a task that forwards every accepted channel.
pub(crate) fn spawn_acceptor<L: Listener>(
    mut listener: L,
    tx: mpsc::UnboundedSender<LinkEvent<L::Connection>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok(conn) => {
                    tracing::debug!(peer = %conn.peer(), "channel accepted");
                    if tx.send(LinkEvent::Accepted(conn)).is_err() {
                        break;
                    }
                }
                Err(TransportError::Shutdown) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
        tracing::debug!("acceptor stopped");
    })
}
