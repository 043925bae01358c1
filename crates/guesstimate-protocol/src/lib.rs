//! Wire protocol for Guesstimate.
//!
//! This crate defines everything that crosses the socket between a player's
//! browser and the server:
//!
//! - **Identity** ([`PlayerId`], [`RoomId`]) and routing ([`Recipient`]).
//! - **Framing** ([`Envelope`], [`Payload`], [`SystemMessage`]): the
//!   outer shape of every frame.
//! - **Game messages** ([`Action`], [`Response`], [`RoomEvent`]): what a
//!   player can ask for, what they get back, and what the room pushes to
//!   everyone.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes in, bytes out.
//!
//! The protocol layer knows nothing about rooms or stages. It only knows
//! how messages look.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Room (game rules)
//! ```

mod codec;
mod error;
mod messages;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{
    Action, PeerAnswer, PlayerSummary, PlayerTokens, QuestionView,
    Response, ResponseData, RoomEvent, Standing, WagerRequest,
};
pub use types::{
    Envelope, Payload, PlayerId, Recipient, RoomId, SystemMessage,
    PROTOCOL_VERSION,
};
