//! Negotiated-channel binding over WebSocket using `tokio-tungstenite`.
//!
//! The bound socket address is the peer's identity. The opener announces
//! its own address in the `x-gamex-peer` upgrade header so the accepting
//! side learns who is calling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Listener, PeerId, Transport, TransportError};

/// Upgrade header carrying the opener's address.
const PEER_HEADER: &str = "x-gamex-peer";

/// How long an accepted socket may take to finish the upgrade.
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A WebSocket-based [`Transport`].
///
/// Cheap to clone; clones share the bound socket.
#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<Inner>,
}

struct Inner {
    bind_addr: String,
    listener: Mutex<Option<TcpListener>>,
    local: OnceLock<PeerId>,
}

impl WebSocketTransport {
    /// Creates a transport that will bind to `addr` on [`Transport::bind`].
    ///
    /// The bound address is handed to guests as the room code, so bind to
    /// an interface they can reach (`127.0.0.1:0` for local play).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                bind_addr: addr.into(),
                listener: Mutex::new(None),
                local: OnceLock::new(),
            }),
        }
    }

    /// Returns the bound address, if [`Transport::bind`] has succeeded.
    pub fn local_id(&self) -> Option<&PeerId> {
        self.inner.local.get()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Listener = WebSocketListener;

    async fn bind(&self) -> Result<PeerId, TransportError> {
        if let Some(id) = self.inner.local.get() {
            return Ok(id.clone());
        }

        let listener = TcpListener::bind(&self.inner.bind_addr)
            .await
            .map_err(TransportError::BindFailed)?;
        let addr = listener.local_addr().map_err(TransportError::BindFailed)?;
        let id = PeerId::new(addr.to_string());

        *self.inner.listener.lock().await = Some(listener);
        let _ = self.inner.local.set(id.clone());

        tracing::info!(%id, "WebSocket transport bound");
        Ok(id)
    }

    async fn listen(&self) -> Result<WebSocketListener, TransportError> {
        let listener = self
            .inner
            .listener
            .lock()
            .await
            .take()
            .ok_or(TransportError::NotBound)?;
        tracing::info!(addr = ?listener.local_addr().ok(), "WebSocket transport listening");
        let (tx, incoming) = mpsc::unbounded_channel();
        Ok(WebSocketListener {
            incoming,
            accept_loop: spawn_accept_loop(listener, tx),
        })
    }

    async fn open(
        &self,
        target: &PeerId,
    ) -> Result<WebSocketConnection, TransportError> {
        let local = self.inner.local.get().ok_or(TransportError::NotBound)?;

        let mut request = format!("ws://{target}")
            .into_client_request()
            .map_err(|e| TransportError::Unreachable(format!("{target}: {e}")))?;
        let announced = HeaderValue::from_str(local.as_str())
            .map_err(|e| TransportError::Unreachable(format!("{target}: {e}")))?;
        request.headers_mut().insert(PEER_HEADER, announced);

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| map_connect_error(target, e))?;

        let conn = WebSocketConnection::new(ws, target.clone());
        tracing::debug!(id = %conn.id, %target, "opened WebSocket connection");
        Ok(conn)
    }
}

fn map_connect_error(target: &PeerId, err: WsError) -> TransportError {
    match err {
        WsError::Http(response) if response.status() == StatusCode::FORBIDDEN => {
            TransportError::PermissionDenied(format!(
                "{target} refused the connection"
            ))
        }
        other => TransportError::Unreachable(format!("{target}: {other}")),
    }
}

/// Accepts WebSocket upgrades on the bound socket.
///
/// Each upgrade runs in its own task, so a client that connects and never
/// upgrades holds up nobody else. Dropping the listener stops accepting.
pub struct WebSocketListener {
    incoming: mpsc::UnboundedReceiver<Result<WebSocketConnection, TransportError>>,
    accept_loop: JoinHandle<()>,
}

impl Listener for WebSocketListener {
    type Connection = WebSocketConnection;

    async fn accept(&mut self) -> Result<WebSocketConnection, TransportError> {
        self.incoming
            .recv()
            .await
            .unwrap_or(Err(TransportError::Shutdown))
    }
}

impl Drop for WebSocketListener {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

fn spawn_accept_loop(
    listener: TcpListener,
    tx: mpsc::UnboundedSender<Result<WebSocketConnection, TransportError>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    if tx.send(Err(TransportError::AcceptFailed(e))).is_err() {
                        return;
                    }
                    continue;
                }
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(UPGRADE_TIMEOUT, upgrade(stream, addr)).await {
                    Ok(Ok(conn)) => {
                        let _ = tx.send(Ok(conn));
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(%addr, error = %e, "WebSocket upgrade failed");
                    }
                    Err(_) => {
                        tracing::debug!(%addr, "WebSocket upgrade timed out");
                    }
                }
            });
        }
    })
}

async fn upgrade(
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<WebSocketConnection, WsError> {
    let mut announced: Option<String> = None;
    let read_header = |request: &Request, response: Response| {
        announced = request
            .headers()
            .get(PEER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        Ok::<Response, ErrorResponse>(response)
    };

    let ws = tokio_tungstenite::accept_hdr_async(
        MaybeTlsStream::Plain(stream),
        read_header,
    )
    .await?;

    let peer = PeerId::new(announced.unwrap_or_else(|| addr.to_string()));
    let conn = WebSocketConnection::new(ws, peer);
    tracing::debug!(id = %conn.id, peer = %conn.peer, %addr, "accepted WebSocket connection");
    Ok(conn)
}

/// A single WebSocket connection.
///
/// The write and read halves are locked separately so a pending `recv`
/// never blocks a `send`.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: PeerId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl WebSocketConnection {
    fn new(ws: WsStream, peer: PeerId) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::next(),
            peer,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ChannelClosed);
        }
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::ChannelClosed
            }
            other => TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                other,
            )),
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.sink.lock().await.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> &PeerId {
        &self.peer
    }
}
