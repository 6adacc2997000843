//! Radio-pairing binding.
//!
//! Models short-range pairing (a Bluetooth-style service advertisement) as a
//! shared in-process [`PairingMedium`]. Each [`PairingTransport`] is one
//! device on that medium. A device that listens advertises the session
//! service, so scanners can discover it. Opening a channel asks the user for
//! consent first.
//!
//! Every device in a test or a local party shares one medium, which also
//! makes this the deterministic binding for exercising the session layer.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use rand::Rng;
use tokio::sync::{mpsc, watch};

use crate::{
    Connection, ConnectionId, Discover, Discovery, Listener, PeerId,
    Transport, TransportError,
};

/// How the local user answers a pairing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consent {
    /// Every pairing request is accepted.
    #[default]
    Granted,
    /// Every pairing request is refused.
    Declined,
}

// ---------------------------------------------------------------------------
// PairingMedium
// ---------------------------------------------------------------------------

/// The shared radio space that pairing transports live on.
///
/// Cheap to clone; all clones see the same devices.
#[derive(Clone)]
pub struct PairingMedium {
    state: Arc<Mutex<MediumState>>,
}

struct MediumState {
    supported: bool,
    endpoints: HashMap<PeerId, Endpoint>,
    links: Vec<LinkRecord>,
}

#[derive(Default)]
struct Endpoint {
    /// Present while the device is advertising the session service.
    incoming: Option<mpsc::UnboundedSender<PairingConnection>>,
}

struct LinkRecord {
    a: PeerId,
    b: PeerId,
    link: Weak<LinkShared>,
}

impl PairingMedium {
    /// Creates an empty medium.
    pub fn new() -> Self {
        Self::with_support(true)
    }

    /// Creates a medium on a host without pairing hardware. Every bind fails
    /// with [`TransportError::Unsupported`].
    pub fn unavailable() -> Self {
        Self::with_support(false)
    }

    fn with_support(supported: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(MediumState {
                supported,
                endpoints: HashMap::new(),
                links: Vec::new(),
            })),
        }
    }

    /// Simulates radio loss for `peer`: every open link it takes part in is
    /// closed on both ends.
    pub fn sever(&self, peer: &PeerId) {
        let mut state = self.lock();
        state.links.retain(|record| {
            let Some(link) = record.link.upgrade() else {
                return false;
            };
            if &record.a == peer || &record.b == peer {
                link.close();
                false
            } else {
                true
            }
        });
        tracing::debug!(%peer, "pairing links severed");
    }

    /// Returns the devices currently advertising the session service.
    pub fn advertising(&self) -> Vec<PeerId> {
        let state = self.lock();
        let mut peers: Vec<PeerId> = state
            .endpoints
            .iter()
            .filter(|(_, endpoint)| endpoint.incoming.is_some())
            .map(|(peer, _)| peer.clone())
            .collect();
        peers.sort();
        peers
    }

    fn lock(&self) -> MutexGuard<'_, MediumState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for PairingMedium {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// PairingTransport
// ---------------------------------------------------------------------------

/// One device on a [`PairingMedium`].
///
/// Clones share one identity. The identity is released back to the medium
/// when the last clone is dropped.
#[derive(Clone)]
pub struct PairingTransport {
    medium: PairingMedium,
    preset: Option<PeerId>,
    consent: Consent,
    local: Arc<Mutex<Option<Registration>>>,
}

/// A bound identity. Dropping it frees the identity on the medium.
struct Registration {
    medium: PairingMedium,
    id: PeerId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut state = self.medium.lock();
        state.endpoints.remove(&self.id);
        state
            .links
            .retain(|record| record.link.strong_count() > 0);
        tracing::debug!(id = %self.id, "pairing device released");
    }
}

impl PairingTransport {
    /// Creates a device with a random identity and granted consent.
    pub fn new(medium: PairingMedium) -> Self {
        Self {
            medium,
            preset: None,
            consent: Consent::Granted,
            local: Arc::new(Mutex::new(None)),
        }
    }

    /// Uses a fixed identity instead of a random one.
    pub fn with_identity(mut self, id: impl Into<PeerId>) -> Self {
        self.preset = Some(id.into());
        self
    }

    /// Sets how pairing requests opened from this device are answered.
    pub fn with_consent(mut self, consent: Consent) -> Self {
        self.consent = consent;
        self
    }

    /// Returns the medium this device lives on.
    pub fn medium(&self) -> &PairingMedium {
        &self.medium
    }

    fn local_id(&self) -> Option<PeerId> {
        self.local
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|registration| registration.id.clone())
    }
}

impl Transport for PairingTransport {
    type Connection = PairingConnection;
    type Listener = PairingListener;

    async fn bind(&self) -> Result<PeerId, TransportError> {
        let mut local =
            self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(registration) = local.as_ref() {
            return Ok(registration.id.clone());
        }

        let mut state = self.medium.lock();
        if !state.supported {
            return Err(TransportError::Unsupported(
                "radio pairing is not available on this host".into(),
            ));
        }

        let id = match &self.preset {
            Some(id) => id.clone(),
            None => generate_identity(),
        };
        if state.endpoints.contains_key(&id) {
            return Err(TransportError::BindFailed(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("pairing identity {id} already in use"),
            )));
        }
        state.endpoints.insert(id.clone(), Endpoint::default());
        *local = Some(Registration {
            medium: self.medium.clone(),
            id: id.clone(),
        });

        tracing::debug!(%id, "pairing device registered");
        Ok(id)
    }

    async fn listen(&self) -> Result<PairingListener, TransportError> {
        let id = self.local_id().ok_or(TransportError::NotBound)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.medium.lock();
        let endpoint = state.endpoints.entry(id.clone()).or_default();
        endpoint.incoming = Some(tx);

        tracing::info!(%id, "advertising session service");
        Ok(PairingListener {
            medium: self.medium.clone(),
            id,
            incoming: rx,
        })
    }

    async fn open(
        &self,
        target: &PeerId,
    ) -> Result<PairingConnection, TransportError> {
        if self.consent == Consent::Declined {
            return Err(TransportError::PermissionDenied(format!(
                "pairing with {target} was declined"
            )));
        }
        let local = self.local_id().ok_or(TransportError::NotBound)?;

        let mut state = self.medium.lock();
        if !state.supported {
            return Err(TransportError::Unsupported(
                "radio pairing is not available on this host".into(),
            ));
        }
        let incoming = state
            .endpoints
            .get(target)
            .and_then(|endpoint| endpoint.incoming.clone())
            .ok_or_else(|| TransportError::Unreachable(target.to_string()))?;

        let (ours, theirs, link) = PairingConnection::pair(&local, target);
        incoming
            .send(theirs)
            .map_err(|_| TransportError::Unreachable(target.to_string()))?;
        state
            .links
            .retain(|record| record.link.strong_count() > 0);
        state.links.push(LinkRecord {
            a: local.clone(),
            b: target.clone(),
            link: Arc::downgrade(&link),
        });

        tracing::debug!(%local, %target, "pairing link opened");
        Ok(ours)
    }
}

impl Discover for PairingTransport {
    type Discovery = PairingDiscovery;

    fn discover(&self) -> PairingDiscovery {
        PairingDiscovery {
            medium: self.medium.clone(),
            local: self.local_id(),
            pending: None,
        }
    }
}

/// Generates a random identity such as `pair-3f9a01bc`.
fn generate_identity() -> PeerId {
    let suffix: u32 = rand::rng().random();
    PeerId::new(format!("pair-{suffix:08x}"))
}

// ---------------------------------------------------------------------------
// Listener and discovery
// ---------------------------------------------------------------------------

/// Accepts pairing requests for one advertising device.
///
/// Dropping the listener withdraws the advertisement.
pub struct PairingListener {
    medium: PairingMedium,
    id: PeerId,
    incoming: mpsc::UnboundedReceiver<PairingConnection>,
}

impl Listener for PairingListener {
    type Connection = PairingConnection;

    async fn accept(&mut self) -> Result<PairingConnection, TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Shutdown)
    }
}

impl Drop for PairingListener {
    fn drop(&mut self) {
        self.incoming.close();
        let mut state = self.medium.lock();
        // The identity may have been released and bound again since.
        if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
            if endpoint.incoming.as_ref().is_some_and(|tx| tx.is_closed()) {
                endpoint.incoming = None;
            }
        }
        tracing::debug!(id = %self.id, "advertisement withdrawn");
    }
}

/// A scan of the medium for advertising devices.
pub struct PairingDiscovery {
    medium: PairingMedium,
    local: Option<PeerId>,
    pending: Option<VecDeque<PeerId>>,
}

impl Discovery for PairingDiscovery {
    async fn next(&mut self) -> Option<PeerId> {
        if self.pending.is_none() {
            let found: VecDeque<PeerId> = self
                .medium
                .advertising()
                .into_iter()
                .filter(|peer| Some(peer) != self.local.as_ref())
                .collect();
            tracing::debug!(found = found.len(), "pairing scan finished");
            self.pending = Some(found);
        }
        self.pending.as_mut().and_then(VecDeque::pop_front)
    }
}

// ---------------------------------------------------------------------------
// PairingConnection
// ---------------------------------------------------------------------------

/// State shared by the two ends of one link.
struct LinkShared {
    closed: watch::Sender<bool>,
}

impl LinkShared {
    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// One end of a pairing link.
pub struct PairingConnection {
    id: ConnectionId,
    peer: PeerId,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    link: Arc<LinkShared>,
}

impl PairingConnection {
    /// Creates both ends of a link between `a` and `b`. The first end talks
    /// to `b`, the second to `a`.
    fn pair(a: &PeerId, b: &PeerId) -> (Self, Self, Arc<LinkShared>) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let link = Arc::new(LinkShared { closed });

        let to_b = Self {
            id: ConnectionId::next(),
            peer: b.clone(),
            outgoing: a_tx,
            incoming: tokio::sync::Mutex::new(a_rx),
            link: Arc::clone(&link),
        };
        let to_a = Self {
            id: ConnectionId::next(),
            peer: a.clone(),
            outgoing: b_tx,
            incoming: tokio::sync::Mutex::new(b_rx),
            link: Arc::clone(&link),
        };
        (to_b, to_a, link)
    }
}

impl Connection for PairingConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.link.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        self.outgoing
            .send(data.to_vec())
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut incoming = self.incoming.lock().await;
        let closed = self.link.closed.subscribe();

        // Frames sent before the close still arrive.
        tokio::select! {
            biased;
            frame = incoming.recv() => Ok(frame),
            () = wait_closed(closed) => Ok(incoming.try_recv().ok()),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.link.close();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> &PeerId {
        &self.peer
    }
}

impl Drop for PairingConnection {
    fn drop(&mut self) {
        self.link.close();
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}
