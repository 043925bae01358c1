//! # Guesstimate
//!
//! A real-time estimation party game server. Players gather in a room
//! under a five-digit code, answer numeric questions, wager tokens on
//! whose estimate is best, and watch the standings after every round.
//!
//! The server is layered the same way the workspace is:
//!
//! ```text
//! transport (WebSocket bytes) → protocol (Envelope) → room (game rules)
//! ```
//!
//! This crate wires those layers together: the [`GuesstimateServer`]
//! accept loop, one handler task per connection, and the environment
//! driven [`ServerConfig`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use guesstimate::prelude::*;
//!
//! # async fn start() -> Result<(), GuesstimateError> {
//! let config = ServerConfig::from_env()?;
//! let server = GuesstimateServerBuilder::from_config(&config)
//!     .questions(config.load_questions()?)
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{ConfigError, ServerConfig, bundled_questions};
pub use error::GuesstimateError;
pub use server::{GuesstimateServer, GuesstimateServerBuilder};

/// Everything needed to start a server or talk to one.
pub mod prelude {
    pub use crate::{
        ConfigError, GuesstimateError, GuesstimateServer,
        GuesstimateServerBuilder, ServerConfig,
    };
    pub use guesstimate_protocol::{
        Action, Codec, Envelope, JsonCodec, Payload, PlayerId, Response,
        ResponseData, RoomEvent, RoomId, SystemMessage, WagerRequest,
        PROTOCOL_VERSION,
    };
    pub use guesstimate_room::{GameConfig, Question, QuestionBank};
}
