//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{ConnectionId, TransportError};

/// Counter for generating unique connection IDs. Starts at 1 so that 0
/// never names a real connection.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<TcpStream>;

/// Listens for browser connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds to `addr`. Use port 0 to let the OS pick (tests).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(addr).await.map_err(TransportError::Bind)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the next TCP connection.
    ///
    /// The WebSocket upgrade is left to [`PendingConnection::upgrade`] so
    /// that a slow client never holds up the accept loop.
    pub async fn accept(&self) -> Result<PendingConnection, TransportError> {
        let (stream, addr) =
            self.listener.accept().await.map_err(TransportError::Accept)?;
        Ok(PendingConnection { stream, addr })
    }
}

/// A TCP connection that has not completed the WebSocket upgrade.
pub struct PendingConnection {
    stream: TcpStream,
    addr: SocketAddr,
}

impl PendingConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the WebSocket handshake and assigns a [`ConnectionId`].
    pub async fn upgrade(self) -> Result<WebSocketConnection, TransportError> {
        let ws = tokio_tungstenite::accept_async(self.stream)
            .await
            .map_err(TransportError::Handshake)?;

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, addr = %self.addr, "accepted WebSocket connection");

        Ok(WebSocketConnection { id, ws })
    }
}

/// An upgraded connection, not yet split.
pub struct WebSocketConnection {
    id: ConnectionId,
    ws: WsStream,
}

impl WebSocketConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Splits the connection and spawns its writer task.
    ///
    /// The writer task runs until every [`ConnectionWriter`] clone is
    /// dropped or one of them calls [`ConnectionWriter::close`].
    pub fn split(self) -> (ConnectionReader, ConnectionWriter) {
        let (sink, stream) = self.ws.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(self.id, sink, rx));

        (
            ConnectionReader {
                id: self.id,
                stream,
            },
            ConnectionWriter { id: self.id, tx },
        )
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// The receiving half of a connection.
pub struct ConnectionReader {
    id: ConnectionId,
    stream: SplitStream<WsStream>,
}

impl ConnectionReader {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next data frame (text or binary), as bytes.
    ///
    /// Returns `Ok(None)` when the peer closed the connection. Control
    /// frames are skipped.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.next_frame().await? {
                Some(Incoming::Data(data)) => return Ok(Some(data)),
                Some(Incoming::Control) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Next frame of any kind. Pings and pongs come back as
    /// [`Incoming::Control`] so callers can count them as activity; the
    /// pong reply itself is handled by tungstenite.
    ///
    /// Returns `Ok(None)` when the peer closed the connection.
    pub async fn next_frame(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => {
                Ok(Some(Incoming::Data(text.as_bytes().to_vec())))
            }
            Some(Ok(Message::Binary(data))) => Ok(Some(Incoming::Data(data.into()))),
            Some(Ok(Message::Close(_))) | None => Ok(None),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                Ok(Some(Incoming::Control))
            }
            Some(Err(e)) => Err(TransportError::Receive(e)),
        }
    }
}

/// One frame read by [`ConnectionReader::next_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A text or binary frame, as bytes.
    Data(Vec<u8>),
    /// A ping or pong. Carries no application data.
    Control,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

/// A cloneable handle that queues frames for a connection.
///
/// Sending never waits on the network: frames are queued and flushed by
/// the connection's writer task.
#[derive(Clone)]
pub struct ConnectionWriter {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl ConnectionWriter {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame. UTF-8 payloads go out as text frames so browser
    /// clients can `JSON.parse` them directly.
    pub fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(Outgoing::Frame(data))
            .map_err(|_| TransportError::Closed(self.id))
    }

    /// Queues a close frame after everything already queued.
    pub fn close(&self) -> Result<(), TransportError> {
        self.tx
            .send(Outgoing::Close)
            .map_err(|_| TransportError::Closed(self.id))
    }

    /// `true` once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = rx.recv().await {
        let msg = match outgoing {
            Outgoing::Frame(data) => match String::from_utf8(data) {
                Ok(text) => Message::Text(text.into()),
                Err(e) => Message::Binary(e.into_bytes().into()),
            },
            Outgoing::Close => {
                let _ = sink.close().await;
                break;
            }
        };

        if let Err(e) = sink.send(msg).await {
            tracing::debug!(%id, error = %e, "write failed, stopping writer");
            break;
        }
    }

    tracing::trace!(%id, "writer stopped");
}
