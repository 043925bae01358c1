//! Network transport for Guesstimate.
//!
//! One listener ([`WebSocketTransport`]) hands out one
//! [`PendingConnection`] per browser tab, which the connection's own task
//! upgrades to a [`WebSocketConnection`]. That is immediately split in
//! two:
//!
//! - a [`ConnectionReader`], owned by the connection's handler task, and
//! - a [`ConnectionWriter`], a cheap cloneable handle that queues frames
//!   without waiting on the socket.
//!
//! Frames written through any clone are delivered in the order they were
//! queued.

mod error;
mod websocket;

pub use error::TransportError;
pub use websocket::{
    ConnectionReader, ConnectionWriter, Incoming, PendingConnection,
    WebSocketConnection, WebSocketTransport,
};

use std::fmt;

/// Opaque identifier for a connection, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id. The server reuses it as the player's identity.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
