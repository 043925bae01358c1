//! Game-level messages: player actions, replies, and room events.
//!
//! JSON tags use kebab-case (`"submit-answer"`, `"all-voted"`) to match
//! the event names the browser client listens for. Field names stay
//! snake_case.

use serde::{Deserialize, Serialize};

use crate::{PlayerId, RoomId};

// ---------------------------------------------------------------------------
// Actions (client → server)
// ---------------------------------------------------------------------------

/// A single wager in a `confirm-wagers` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerRequest {
    /// The player whose answer is being backed.
    pub target_id: PlayerId,
    /// Tokens at stake.
    pub stake: u32,
}

/// Everything a player can ask the server to do.
///
/// Internally tagged: `{ "action": "join-room", "room_id": 48213, ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    /// Open a new room and join it as its first player.
    CreateRoom { display_name: String },

    /// Join an existing room that is still in its lobby.
    JoinRoom {
        room_id: RoomId,
        display_name: String,
    },

    /// Lobby only: "I'm ready to start."
    PlayerReady,

    /// The prompt for the current round.
    GetQuestion,

    /// Submit an estimate. Sent as the raw text the player typed; the
    /// server does the parsing.
    SubmitAnswer { value: String },

    /// Fetch the other players' answers and this player's balance.
    BeginVoting,

    /// Lock in this round's wagers.
    ConfirmWagers {
        wagers: Vec<WagerRequest>,
        /// What the client believes is left after staking. Signed so that
        /// a buggy client's negative value reaches validation instead of
        /// failing to decode.
        declared_remaining_tokens: i64,
    },

    /// Correct answer and balances after settlement.
    GetVotingResults,

    /// Current standings.
    GetPlayerRankings,

    /// Leave the current room. Same effect as closing the connection.
    LeaveRoom,
}

impl Action {
    /// Stable name for logs; matches the JSON tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create-room",
            Self::JoinRoom { .. } => "join-room",
            Self::PlayerReady => "player-ready",
            Self::GetQuestion => "get-question",
            Self::SubmitAnswer { .. } => "submit-answer",
            Self::BeginVoting => "begin-voting",
            Self::ConfirmWagers { .. } => "confirm-wagers",
            Self::GetVotingResults => "get-voting-results",
            Self::GetPlayerRankings => "get-player-rankings",
            Self::LeaveRoom => "leave-room",
        }
    }
}

// ---------------------------------------------------------------------------
// Shared views
// ---------------------------------------------------------------------------

/// One roster entry, as shown in the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub player_id: PlayerId,
    pub display_name: String,
    pub ready: bool,
}

/// One line of a ranking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub display_name: String,
    pub token_balance: u32,
}

/// Another player's answer, offered for wagering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerAnswer {
    pub peer_id: PlayerId,
    pub answer: f64,
}

/// A player's balance in the voting results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerTokens {
    pub player_id: PlayerId,
    pub display_name: String,
    pub tokens: u32,
}

/// The question being played. Never includes the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionView {
    pub prompt: String,
    pub unit: String,
    pub round_index: usize,
    pub question_count: usize,
}

// ---------------------------------------------------------------------------
// Responses (server → client, one per request)
// ---------------------------------------------------------------------------

/// Action-specific success payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResponseData {
    /// `create-room` / `join-room`.
    Room { room_id: RoomId },

    /// `get-question`.
    Question(QuestionView),

    /// `begin-voting`.
    Ballot {
        answers: Vec<PeerAnswer>,
        unit: String,
        token_balance: u32,
    },

    /// `get-voting-results`.
    VotingResults {
        correct_answer: f64,
        closest_below: Option<f64>,
        unit: String,
        self_tokens: u32,
        all_tokens: Vec<PlayerTokens>,
    },

    /// `get-player-rankings`.
    Rankings { rankings: Vec<Standing> },
}

/// The structured `{success, message?, data?}` reply every request gets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl Response {
    /// Success with no payload.
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
        }
    }

    /// Success with a payload.
    pub fn with_data(data: ResponseData) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Refusal. `message` is shown to the player as-is.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Room events (server → room members)
// ---------------------------------------------------------------------------

/// Broadcasts pushed to the members of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RoomEvent {
    /// The roster changed (join or leave). Always the full list.
    RosterUpdated { players: Vec<PlayerSummary> },

    /// A player flagged themselves ready in the lobby.
    PlayerReadyUpdated { player_id: PlayerId },

    /// Everyone is ready; the first round starts now.
    AllReady { round_index: usize },

    /// Every answer is in; voting is open.
    AllAnswered,

    /// Every wager is in; the round has been settled.
    AllVoted,

    /// Standings after this round's settlement.
    ShowIntermediateRanking {
        round_index: usize,
        rankings: Vec<Standing>,
    },

    /// The next round has started.
    RoundAdvanced { round_index: usize },

    /// The last round is over. Final standings.
    GameEnded { rankings: Vec<Standing> },

    /// A player left the room.
    PlayerDisconnected { player_id: PlayerId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_unit_variant_json_format() {
        let json = serde_json::to_value(&Action::PlayerReady).unwrap();
        assert_eq!(json, serde_json::json!({ "action": "player-ready" }));
    }

    #[test]
    fn test_action_confirm_wagers_decodes() {
        let raw = r#"{
            "action": "confirm-wagers",
            "wagers": [{ "target_id": 4, "stake": 10 }],
            "declared_remaining_tokens": 90
        }"#;
        let action: Action = serde_json::from_str(raw).unwrap();

        assert_eq!(
            action,
            Action::ConfirmWagers {
                wagers: vec![WagerRequest {
                    target_id: PlayerId(4),
                    stake: 10,
                }],
                declared_remaining_tokens: 90,
            }
        );
    }

    #[test]
    fn test_action_negative_stake_fails_to_decode() {
        let raw = r#"{
            "action": "confirm-wagers",
            "wagers": [{ "target_id": 4, "stake": -10 }],
            "declared_remaining_tokens": 90
        }"#;
        assert!(serde_json::from_str::<Action>(raw).is_err());
    }

    #[test]
    fn test_action_name_matches_json_tag() {
        let action = Action::JoinRoom {
            room_id: RoomId(12345),
            display_name: "ada".into(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], action.name());
    }

    #[test]
    fn test_response_failure_omits_data() {
        let json =
            serde_json::to_value(Response::failure("room is full")).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "room is full");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_response_ok_omits_message_and_data() {
        let json = serde_json::to_value(Response::ok()).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true }));
    }

    #[test]
    fn test_response_ballot_json_format() {
        let response = Response::with_data(ResponseData::Ballot {
            answers: vec![PeerAnswer {
                peer_id: PlayerId(2),
                answer: 8848.0,
            }],
            unit: "m".into(),
            token_balance: 100,
        });
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["data"]["kind"], "ballot");
        assert_eq!(json["data"]["answers"][0]["peer_id"], 2);
        assert_eq!(json["data"]["token_balance"], 100);
    }

    #[test]
    fn test_room_event_json_tags_are_kebab_case() {
        let event = RoomEvent::ShowIntermediateRanking {
            round_index: 1,
            rankings: vec![],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "show-intermediate-ranking");

        let json =
            serde_json::to_value(RoomEvent::PlayerDisconnected {
                player_id: PlayerId(3),
            })
            .unwrap();
        assert_eq!(json["event"], "player-disconnected");
        assert_eq!(json["player_id"], 3);
    }
}
