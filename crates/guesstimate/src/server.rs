//! `GuesstimateServer` builder and server loop.
//!
//! This is the entry point for running a Guesstimate server. It ties
//! together all the layers: transport → protocol → room.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use guesstimate_protocol::{Codec, JsonCodec};
use guesstimate_room::{GameConfig, QuestionBank, RoomManager};
use guesstimate_transport::WebSocketTransport;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{ServerConfig, bundled_questions};
use crate::handler::handle_connection;
use crate::GuesstimateError;

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
/// Interior mutability via `Mutex` where needed.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) rooms: Mutex<RoomManager>,
    pub(crate) codec: C,
    pub(crate) idle_timeout: Duration,
    pub(crate) handshake_timeout: Duration,
    /// Origin of every envelope timestamp.
    pub(crate) started: Instant,
}

/// Builder for configuring and starting a Guesstimate server.
///
/// # Example
///
/// ```rust,no_run
/// use guesstimate::prelude::*;
///
/// # async fn start() -> Result<(), GuesstimateError> {
/// let server = GuesstimateServer::builder()
///     .bind("0.0.0.0:3001")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct GuesstimateServerBuilder {
    bind_addr: String,
    game: GameConfig,
    questions: Option<QuestionBank>,
    idle_timeout: Duration,
    handshake_timeout: Duration,
    seed: Option<u64>,
}

impl GuesstimateServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::from_config(&ServerConfig::default())
    }

    /// Starts from a loaded [`ServerConfig`]. The question file is not
    /// read here; pass the bank to [`questions`](Self::questions).
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            bind_addr: config.bind_addr.clone(),
            game: config.game.clone(),
            questions: None,
            idle_timeout: config.idle_timeout,
            handshake_timeout: config.handshake_timeout,
            seed: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn game_config(mut self, config: GameConfig) -> Self {
        self.game = config;
        self
    }

    /// Question bank every room draws its deck from. Defaults to the
    /// bundled set.
    pub fn questions(mut self, bank: QuestionBank) -> Self {
        self.questions = Some(bank);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Fixes room codes and deck order. For tests.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Binds the listener and prepares the shared state.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build(self) -> Result<GuesstimateServer<JsonCodec>, GuesstimateError> {
        let bank = match self.questions {
            Some(bank) => bank,
            None => bundled_questions()?,
        };
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let state = Arc::new(ServerState {
            rooms: Mutex::new(RoomManager::with_rng(bank, self.game, rng)),
            codec: JsonCodec,
            idle_timeout: self.idle_timeout,
            handshake_timeout: self.handshake_timeout,
            started: Instant::now(),
        });

        Ok(GuesstimateServer { transport, state })
    }
}

impl Default for GuesstimateServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Guesstimate server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct GuesstimateServer<C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
}

impl GuesstimateServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> GuesstimateServerBuilder {
        GuesstimateServerBuilder::new()
    }
}

impl<C: Codec> GuesstimateServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), GuesstimateError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes.
    ///
    /// Each accepted socket gets its own task for the WebSocket upgrade
    /// and the connection handler, so a slow client never stalls the
    /// loop. Connections already running are not interrupted.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), GuesstimateError> {
        let addr = self.local_addr().ok();
        tracing::info!(?addr, "guesstimate server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested, no longer accepting");
                    break;
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            let peer = pending.peer_addr();
                            let conn = match tokio::time::timeout(
                                state.handshake_timeout,
                                pending.upgrade(),
                            )
                            .await
                            {
                                Ok(Ok(conn)) => conn,
                                Ok(Err(e)) => {
                                    tracing::debug!(%peer, error = %e, "websocket upgrade failed");
                                    return;
                                }
                                Err(_) => {
                                    tracing::debug!(%peer, "websocket upgrade timed out");
                                    return;
                                }
                            };
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(
                                    %peer,
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        Ok(())
    }
}
