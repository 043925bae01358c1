//! Unified error type for the Guesstimate server.

use guesstimate_protocol::ProtocolError;
use guesstimate_room::{QuestionBankError, RoomError};
use guesstimate_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum GuesstimateError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, bad handshake).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A room-level error. Handlers turn these into failed responses, so
    /// this only surfaces outside a request.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The question bank could not be loaded.
    #[error(transparent)]
    Questions(#[from] QuestionBankError),

    /// Startup configuration was malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
