//! Live connections, keyed by the peer on the other end.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gamex_protocol::PeerId;
use gamex_transport::{Connection, ConnectionId};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Channel open, handshake not finished.
    Pending,
    /// Handshake done; frames flow.
    Open,
    /// Torn down.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// One registered connection and the task reading from it.
pub(crate) struct Entry<C> {
    pub conn: Arc<C>,
    pub state: ConnectionState,
    /// When a `Pending` entry gives up on its handshake.
    deadline: Option<Instant>,
    pump: Option<JoinHandle<()>>,
}

impl<C: Connection> Entry<C> {
    /// Stops the read pump and closes the channel.
    pub async fn shutdown(mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.state = ConnectionState::Closed;
        if let Err(e) = self.conn.close().await {
            tracing::debug!(peer = %self.conn.peer(), error = %e, "close failed");
        }
    }
}

/// At most one connection per peer.
///
/// Registering a second connection for the same peer hands the old entry
/// back so the caller can shut it down.
pub(crate) struct ConnectionRegistry<C> {
    entries: HashMap<PeerId, Entry<C>>,
}

impl<C: Connection> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Adds a connection in the `Pending` state.
    ///
    /// With a `deadline`, the entry is handed back by
    /// [`expire`](Self::expire) if it is still pending by then.
    pub fn register(
        &mut self,
        conn: Arc<C>,
        pump: JoinHandle<()>,
        deadline: Option<Instant>,
    ) -> Option<Entry<C>> {
        let peer = conn.peer().clone();
        tracing::debug!(%peer, conn = %conn.id(), "connection registered");
        self.entries.insert(
            peer,
            Entry {
                conn,
                state: ConnectionState::Pending,
                deadline,
                pump: Some(pump),
            },
        )
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Arc<C>> {
        self.entries.get(peer).map(|entry| &entry.conn)
    }

    pub fn state(&self, peer: &PeerId) -> Option<ConnectionState> {
        self.entries.get(peer).map(|entry| entry.state)
    }

    /// Returns `true` if `conn` is still the live connection for `peer`.
    ///
    /// Frames and close notices from a replaced connection fail this check.
    pub fn is_current(&self, peer: &PeerId, conn: ConnectionId) -> bool {
        self.entries
            .get(peer)
            .is_some_and(|entry| entry.conn.id() == conn)
    }

    /// Moves a connection from `Pending` to `Open`.
    pub fn mark_open(&mut self, peer: &PeerId) -> bool {
        match self.entries.get_mut(peer) {
            Some(entry) if entry.state == ConnectionState::Pending => {
                entry.state = ConnectionState::Open;
                entry.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Unregisters `peer`. With `Some(conn)`, only if that connection is
    /// still the current one.
    pub fn remove(
        &mut self,
        peer: &PeerId,
        conn: Option<ConnectionId>,
    ) -> Option<Entry<C>> {
        if conn.is_some_and(|conn| !self.is_current(peer, conn)) {
            return None;
        }
        let mut entry = self.entries.remove(peer)?;
        entry.state = ConnectionState::Closed;
        Some(entry)
    }

    /// The earliest handshake deadline among pending entries.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|entry| entry.state == ConnectionState::Pending)
            .filter_map(|entry| entry.deadline)
            .min()
    }

    /// Unregisters pending entries whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<Entry<C>> {
        let expired: Vec<PeerId> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.state == ConnectionState::Pending
                    && entry.deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|(peer, _)| peer.clone())
            .collect();
        expired
            .iter()
            .filter_map(|peer| self.remove(peer, None))
            .collect()
    }

    /// Open connections, optionally skipping one peer.
    pub fn open(&self, except: Option<&PeerId>) -> Vec<Arc<C>> {
        let mut conns: Vec<_> = self
            .entries
            .iter()
            .filter(|(peer, entry)| {
                entry.state == ConnectionState::Open && Some(*peer) != except
            })
            .map(|(_, entry)| Arc::clone(&entry.conn))
            .collect();
        conns.sort_by(|a, b| a.peer().cmp(b.peer()));
        conns
    }

    /// Peers with an open connection, sorted.
    pub fn open_peers(&self) -> Vec<PeerId> {
        self.open(None).iter().map(|c| c.peer().clone()).collect()
    }

    /// Unregisters everything.
    pub fn drain(&mut self) -> Vec<Entry<C>> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use gamex_transport::TransportError;

    use super::*;

    struct FakeConn {
        id: ConnectionId,
        peer: PeerId,
        closed: AtomicBool,
    }

    impl FakeConn {
        fn new(id: u64, peer: &str) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(id),
                peer: PeerId::from(peer),
                closed: AtomicBool::new(false),
            })
        }
    }

    impl Connection for FakeConn {
        async fn send(&self, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(None)
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn id(&self) -> ConnectionId {
            self.id
        }

        fn peer(&self) -> &PeerId {
            &self.peer
        }
    }

    fn idle_pump() -> JoinHandle<()> {
        tokio::spawn(std::future::pending())
    }

    #[tokio::test]
    async fn test_register_starts_pending() {
        let mut registry = ConnectionRegistry::new();
        registry.register(FakeConn::new(1, "g"), idle_pump(), None);

        let peer = PeerId::from("g");
        assert_eq!(registry.state(&peer), Some(ConnectionState::Pending));
        assert!(registry.open(None).is_empty());

        assert!(registry.mark_open(&peer));
        assert!(!registry.mark_open(&peer));
        assert_eq!(registry.open_peers(), vec![peer]);
    }

    #[tokio::test]
    async fn test_register_same_peer_returns_old_entry() {
        let mut registry = ConnectionRegistry::new();
        let first = FakeConn::new(1, "g");
        registry.register(Arc::clone(&first), idle_pump(), None);

        let old = registry
            .register(FakeConn::new(2, "g"), idle_pump(), None)
            .expect("old entry handed back");
        old.shutdown().await;

        assert!(first.closed.load(Ordering::SeqCst));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_current(&PeerId::from("g"), ConnectionId::new(2)));
    }

    #[tokio::test]
    async fn test_remove_ignores_stale_connection_id() {
        let mut registry = ConnectionRegistry::new();
        registry.register(FakeConn::new(7, "g"), idle_pump(), None);

        let peer = PeerId::from("g");
        assert!(registry.remove(&peer, Some(ConnectionId::new(3))).is_none());
        let entry = registry.remove(&peer, Some(ConnectionId::new(7))).unwrap();
        assert_eq!(entry.state, ConnectionState::Closed);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_open_skips_excluded_peer_in_order() {
        let mut registry = ConnectionRegistry::new();
        for (id, peer) in [(1, "b"), (2, "a"), (3, "c")] {
            registry.register(FakeConn::new(id, peer), idle_pump(), None);
            registry.mark_open(&PeerId::from(peer));
        }

        let peers: Vec<_> = registry
            .open(Some(&PeerId::from("b")))
            .iter()
            .map(|c| c.peer().to_string())
            .collect();
        assert_eq!(peers, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_expire_drops_only_overdue_pending_entries() {
        let mut registry = ConnectionRegistry::new();
        let now = Instant::now();
        let soon = now + std::time::Duration::from_millis(50);
        let later = now + std::time::Duration::from_secs(60);

        let stalled = FakeConn::new(1, "stalled");
        registry.register(Arc::clone(&stalled), idle_pump(), Some(soon));
        registry.register(FakeConn::new(2, "slow"), idle_pump(), Some(later));
        registry.register(FakeConn::new(3, "joined"), idle_pump(), Some(soon));
        registry.mark_open(&PeerId::from("joined"));
        registry.register(FakeConn::new(4, "moderator"), idle_pump(), None);

        assert_eq!(registry.next_deadline(), Some(soon));
        assert!(registry.expire(now).is_empty());

        let expired = registry.expire(soon);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].conn.peer(), &PeerId::from("stalled"));
        for entry in expired {
            entry.shutdown().await;
        }
        assert!(stalled.closed.load(Ordering::SeqCst));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.next_deadline(), Some(later));
    }

    #[tokio::test]
    async fn test_drain_empties_registry() {
        let mut registry = ConnectionRegistry::new();
        let conn = FakeConn::new(1, "g");
        registry.register(Arc::clone(&conn), idle_pump(), None);

        for entry in registry.drain() {
            entry.shutdown().await;
        }
        assert_eq!(registry.len(), 0);
        assert!(conn.closed.load(Ordering::SeqCst));
    }
}
