use tokio_tungstenite::tungstenite;

use crate::ConnectionId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listening socket failed.
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    /// Accepting a TCP connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The TCP connection was accepted but the WebSocket upgrade failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    /// Reading a frame failed (reset, protocol violation).
    #[error("receive failed: {0}")]
    Receive(#[source] tungstenite::Error),

    /// The connection's writer task has stopped; nothing more can be sent.
    #[error("{0} is closed")]
    Closed(ConnectionId),
}
