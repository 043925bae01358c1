//! Per-player round state.

use guesstimate_protocol::{PlayerId, PlayerSummary};

use crate::RoomError;

/// Tokens a player put on another player's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wager {
    pub target: PlayerId,
    pub stake: u32,
}

/// A seated player. Owned by its room and dropped when the player leaves.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    /// "Ready to start" in the lobby, "done with this stage" during a round.
    pub ready: bool,
    pub answer: Option<f64>,
    /// `None` until wagering starts for the first time.
    pub tokens: Option<u32>,
    pub wagers: Vec<Wager>,
}

impl Player {
    pub fn new(id: PlayerId, display_name: String) -> Self {
        Self {
            id,
            display_name,
            ready: false,
            answer: None,
            tokens: None,
            wagers: Vec::new(),
        }
    }

    /// Current balance, counting an unset balance as `default`.
    pub fn balance(&self, default: u32) -> u32 {
        self.tokens.unwrap_or(default)
    }

    /// Sets the balance to `default` if it was never set, and returns it.
    pub fn ensure_tokens(&mut self, default: u32) -> u32 {
        *self.tokens.get_or_insert(default)
    }

    /// Clears everything that only lives for one round.
    pub fn reset_round(&mut self) {
        self.ready = false;
        self.answer = None;
        self.wagers.clear();
    }

    pub fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            player_id: self.id,
            display_name: self.display_name.clone(),
            ready: self.ready,
        }
    }
}

/// Trims `raw` and checks it is a usable display name.
pub fn validate_display_name(
    raw: &str,
    max_len: usize,
) -> Result<String, RoomError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(RoomError::InvalidName("name cannot be empty".into()));
    }
    let len = name.chars().count();
    if len > max_len {
        return Err(RoomError::InvalidName(format!(
            "name is {len} characters, the limit is {max_len}"
        )));
    }
    Ok(name.to_string())
}
