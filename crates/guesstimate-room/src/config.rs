//! Game configuration and the stage machine's states.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// GameConfig
// ---------------------------------------------------------------------------

/// The tunable constants of a match. One copy is shared by every room the
/// manager creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Rounds per match. A shorter question bank caps this.
    pub question_limit: usize,

    /// Roster size at which joins are refused.
    pub max_users_per_room: usize,

    /// Longest accepted display name, in characters, after trimming.
    pub max_username_length: usize,

    /// Balance every player starts wagering with.
    pub default_tokens: u32,

    /// Floor applied after settlement. Nobody is ever starved out.
    pub minimum_tokens: u32,

    /// Delay from settlement to the ranking reveal; the next round (or
    /// the end of the game) follows after the same delay again.
    pub inner_ranking_timeout: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            question_limit: 5,
            max_users_per_room: 8,
            max_username_length: 20,
            default_tokens: 100,
            minimum_tokens: 10,
            inner_ranking_timeout: Duration::from_secs(5),
        }
    }
}

impl GameConfig {
    /// Clamp values that would make the game unplayable.
    ///
    /// - at least one round and one seat;
    /// - `minimum_tokens` never above `default_tokens`.
    pub fn validated(mut self) -> Self {
        if self.question_limit == 0 {
            tracing::warn!("question_limit is 0, using 1");
            self.question_limit = 1;
        }
        if self.max_users_per_room == 0 {
            tracing::warn!("max_users_per_room is 0, using 1");
            self.max_users_per_room = 1;
        }
        if self.max_username_length == 0 {
            tracing::warn!("max_username_length is 0, using 1");
            self.max_username_length = 1;
        }
        if self.minimum_tokens > self.default_tokens {
            tracing::warn!(
                minimum = self.minimum_tokens,
                default = self.default_tokens,
                "minimum_tokens exceeds default_tokens, clamping"
            );
            self.minimum_tokens = self.default_tokens;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Where a room is in its match.
///
/// ```text
/// Lobby → Answering → Voting → Settling ─┬→ Answering   (next round)
///                                        └→ Ended       (last round)
/// ```
///
/// - **Lobby**: accepting joins, waiting for everyone to be ready.
/// - **Answering**: players submit their estimate for the current question.
/// - **Voting**: players wager tokens on each other's estimates.
/// - **Settling**: wagers are paid out; the ranking reveal and the next
///   round are on timers.
/// - **Ended**: terminal. The room stays up for final rankings until the
///   last player leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Lobby,
    Answering,
    Voting,
    Settling,
    Ended,
}

impl Stage {
    /// Only the lobby takes new players.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Lobby)
    }

    /// The stage that follows this one. `last_round` picks the branch out
    /// of `Settling`.
    pub fn next(self, last_round: bool) -> Option<Self> {
        match self {
            Self::Lobby => Some(Self::Answering),
            Self::Answering => Some(Self::Voting),
            Self::Voting => Some(Self::Settling),
            Self::Settling if last_round => Some(Self::Ended),
            Self::Settling => Some(Self::Answering),
            Self::Ended => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lobby => write!(f, "Lobby"),
            Self::Answering => write!(f, "Answering"),
            Self::Voting => write!(f, "Voting"),
            Self::Settling => write!(f, "Settling"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_next_follows_round_cycle() {
        assert_eq!(Stage::Lobby.next(false), Some(Stage::Answering));
        assert_eq!(Stage::Answering.next(false), Some(Stage::Voting));
        assert_eq!(Stage::Voting.next(false), Some(Stage::Settling));
        assert_eq!(Stage::Settling.next(false), Some(Stage::Answering));
        assert_eq!(Stage::Settling.next(true), Some(Stage::Ended));
        assert_eq!(Stage::Ended.next(true), None);
    }

    #[test]
    fn test_stage_is_joinable_only_in_lobby() {
        assert!(Stage::Lobby.is_joinable());
        assert!(!Stage::Answering.is_joinable());
        assert!(!Stage::Settling.is_joinable());
        assert!(!Stage::Ended.is_joinable());
    }

    #[test]
    fn test_game_config_default() {
        let config = GameConfig::default();
        assert_eq!(config.question_limit, 5);
        assert_eq!(config.max_users_per_room, 8);
        assert_eq!(config.default_tokens, 100);
        assert_eq!(config.minimum_tokens, 10);
        assert_eq!(config.inner_ranking_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_game_config_validated_clamps_minimum_to_default() {
        let config = GameConfig {
            default_tokens: 50,
            minimum_tokens: 80,
            question_limit: 0,
            ..GameConfig::default()
        }
        .validated();

        assert_eq!(config.minimum_tokens, 50);
        assert_eq!(config.question_limit, 1);
    }
}
