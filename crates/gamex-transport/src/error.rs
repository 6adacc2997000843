/// Errors that can occur in the transport layer.
///
/// The first three variants are the typed outcomes of opening a channel to
/// a peer. The session layer maps them onto attempt-level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Nothing is listening at the target address.
    #[error("peer {0} is unreachable")]
    Unreachable(String),

    /// The user or the remote side refused the channel.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The binding cannot run on this host (missing radio, no permission API).
    #[error("transport unsupported: {0}")]
    Unsupported(String),

    /// The channel was closed by either side.
    #[error("channel closed")]
    ChannelClosed,

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Accepting an incoming channel failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Obtaining a local address failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// The operation needs a local address; call `bind` first.
    #[error("transport is not bound")]
    NotBound,

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
