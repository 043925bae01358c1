//! Rooms, rounds, and wagers for Guesstimate.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns a
//! [`Game`]: the roster, a shuffled question deck, and the stage machine
//!
//! ```text
//! Lobby → Answering → Voting → Settling → (Answering | Ended)
//! ```
//!
//! # Key types
//!
//! - [`RoomManager`]: creates and deletes rooms, routes players
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`Game`]: the synchronous stage machine a room actor drives
//! - [`QuestionBank`]: validated questions loaded once at startup
//! - [`GameConfig`]: round count, seat limit, token amounts, timeouts

mod config;
mod error;
pub mod game;
mod manager;
mod player;
mod question;
mod room;
pub mod settlement;

pub use config::{GameConfig, Stage};
pub use error::{ErrorKind, RoomError};
pub use game::{Effect, Game, TimerKind};
pub use manager::RoomManager;
pub use player::{Player, Wager, validate_display_name};
pub use question::{Question, QuestionBank, QuestionBankError};
pub use room::{LeaveOutcome, PlayerSender, RoomHandle, RoomInfo, RoomRequest};
pub use settlement::{Payout, Settlement};
