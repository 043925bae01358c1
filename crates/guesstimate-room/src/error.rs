//! Error types for the room layer.

use guesstimate_protocol::{PlayerId, RoomId};

use crate::Stage;

/// Errors that can occur during room operations.
///
/// Every variant's `Display` text is written to be shown to the player
/// as the `message` of a failed response.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist (never did, or was deleted).
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The room has no free seat.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// The room's match has already started.
    #[error("room {0} has already started its game")]
    GameInProgress(RoomId),

    /// Someone in the room already uses this display name.
    #[error("the name \"{0}\" is already taken in this room")]
    DuplicateName(String),

    /// The display name is empty or too long.
    #[error("invalid display name: {0}")]
    InvalidName(String),

    /// The player is already seated in a room.
    #[error("player {0} is already in room {1}")]
    AlreadyInRoom(PlayerId, RoomId),

    /// The player is not in any room.
    #[error("player {0} is not in a room")]
    NotInRoom(PlayerId),

    /// The action is not valid in the room's current stage.
    #[error("cannot {action} during {stage}")]
    WrongStage { action: &'static str, stage: Stage },

    /// The submitted answer is not a finite, non-negative number.
    #[error("invalid answer: {0}")]
    InvalidAnswer(String),

    /// A wager names a bad target or a bad amount.
    #[error("invalid wager: {0}")]
    InvalidWager(String),

    /// More tokens were committed than the player holds.
    #[error("not enough tokens: requested {requested}, available {available}")]
    InsufficientTokens { requested: u64, available: u32 },

    /// No free room code could be found.
    #[error("no room code available, try again")]
    RoomCodesExhausted,

    /// The room actor has stopped. A full command channel makes callers
    /// wait rather than fail.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),
}

/// Coarse classification used for logging and client-side handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input from the player.
    Validation,
    /// The request is well-formed but the room is not in a state to take it.
    Precondition,
    /// A limit was hit.
    ResourceExhaustion,
}

impl RoomError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateName(_)
            | Self::InvalidName(_)
            | Self::InvalidAnswer(_)
            | Self::InvalidWager(_) => ErrorKind::Validation,
            Self::RoomFull(_)
            | Self::InsufficientTokens { .. }
            | Self::RoomCodesExhausted => ErrorKind::ResourceExhaustion,
            Self::NotFound(_)
            | Self::GameInProgress(_)
            | Self::AlreadyInRoom(..)
            | Self::NotInRoom(_)
            | Self::WrongStage { .. }
            | Self::Unavailable(_) => ErrorKind::Precondition,
        }
    }
}
