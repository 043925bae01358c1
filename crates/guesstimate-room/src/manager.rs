//! Room manager: creates, tracks, and routes players to rooms.

use std::collections::HashMap;

use guesstimate_protocol::{PlayerId, ResponseData, RoomId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::game::Game;
use crate::player::validate_display_name;
use crate::room::spawn_room;
use crate::{
    GameConfig, LeaveOutcome, PlayerSender, QuestionBank, RoomError,
    RoomHandle, RoomInfo, RoomRequest,
};

/// Default command channel size for room actors.
const DEFAULT_CHANNEL_SIZE: usize = 64;

/// Room codes are five decimal digits.
const ROOM_CODE_RANGE: std::ops::RangeInclusive<u32> = 10_000..=99_999;

/// Draws before giving up on finding a free room code.
const MAX_ROOM_CODE_ATTEMPTS: usize = 32;

/// Manages all active rooms and tracks which player is in which room.
///
/// Owned by the server and shared between connection handlers behind an
/// async mutex. A room is deleted the moment its last player leaves.
pub struct RoomManager {
    /// Active rooms, keyed by room ID.
    rooms: HashMap<RoomId, RoomHandle>,

    /// Maps each player to the room they're currently in.
    /// A player can be in at most ONE room at a time.
    player_rooms: HashMap<PlayerId, RoomId>,

    bank: QuestionBank,
    config: GameConfig,

    /// Room codes and deck order.
    rng: StdRng,
}

impl RoomManager {
    pub fn new(bank: QuestionBank, config: GameConfig) -> Self {
        Self::with_rng(bank, config, StdRng::from_os_rng())
    }

    /// Like [`new`](Self::new) with a caller-supplied generator, so room
    /// codes and decks are reproducible.
    pub fn with_rng(bank: QuestionBank, config: GameConfig, rng: StdRng) -> Self {
        Self {
            rooms: HashMap::new(),
            player_rooms: HashMap::new(),
            bank,
            config: config.validated(),
            rng,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Creates a room with its own shuffled deck and seats its creator.
    pub async fn create_room(
        &mut self,
        player_id: PlayerId,
        display_name: &str,
        sender: PlayerSender,
    ) -> Result<RoomId, RoomError> {
        if let Some(current) = self.player_rooms.get(&player_id) {
            return Err(RoomError::AlreadyInRoom(player_id, *current));
        }
        validate_display_name(display_name, self.config.max_username_length)?;

        let rooms = &self.rooms;
        let room_id = pick_room_id(&mut self.rng, |id| rooms.contains_key(&id))?;
        let deck = self.bank.shuffled_deck(&mut self.rng);
        let handle = spawn_room(
            Game::new(room_id, self.config.clone(), deck),
            DEFAULT_CHANNEL_SIZE,
        );

        if let Err(e) = handle.join(player_id, display_name.to_string(), sender).await {
            let _ = handle.shutdown().await;
            return Err(e);
        }

        self.rooms.insert(room_id, handle);
        self.player_rooms.insert(player_id, room_id);
        tracing::info!(%room_id, %player_id, rooms = self.rooms.len(), "room created");
        Ok(room_id)
    }

    /// Seats a player in an existing room.
    ///
    /// Enforces the "one room at a time" invariant.
    pub async fn join_room(
        &mut self,
        player_id: PlayerId,
        room_id: RoomId,
        display_name: &str,
        sender: PlayerSender,
    ) -> Result<(), RoomError> {
        if let Some(current) = self.player_rooms.get(&player_id) {
            return Err(RoomError::AlreadyInRoom(player_id, *current));
        }

        let handle = self
            .rooms
            .get(&room_id)
            .ok_or(RoomError::NotFound(room_id))?;

        handle
            .join(player_id, display_name.to_string(), sender)
            .await?;
        self.player_rooms.insert(player_id, room_id);
        Ok(())
    }

    /// Removes a player from their current room, deleting the room if it
    /// is now empty.
    pub async fn leave_room(&mut self, player_id: PlayerId) -> Result<LeaveOutcome, RoomError> {
        let room_id = self
            .player_rooms
            .remove(&player_id)
            .ok_or(RoomError::NotInRoom(player_id))?;

        let outcome = match self.rooms.get(&room_id) {
            Some(handle) => match handle.leave(player_id).await {
                Ok(outcome) => outcome,
                // The actor is already gone; treat the room as vacated.
                Err(RoomError::Unavailable(_)) => LeaveOutcome::Vacated,
                Err(e) => return Err(e),
            },
            None => LeaveOutcome::Vacated,
        };

        if outcome == LeaveOutcome::Vacated {
            self.rooms.remove(&room_id);
            self.player_rooms.retain(|_, rid| *rid != room_id);
            tracing::info!(%room_id, rooms = self.rooms.len(), "room deleted");
        }
        Ok(outcome)
    }

    /// The handle of the player's current room.
    ///
    /// Lets callers talk to the room without holding the manager lock.
    pub fn handle_for(&self, player_id: PlayerId) -> Result<RoomHandle, RoomError> {
        let room_id = self
            .player_rooms
            .get(&player_id)
            .ok_or(RoomError::NotInRoom(player_id))?;
        self.rooms
            .get(room_id)
            .cloned()
            .ok_or(RoomError::NotFound(*room_id))
    }

    /// Routes an in-room action from a player to their current room.
    pub async fn route_request(
        &self,
        player_id: PlayerId,
        request: RoomRequest,
    ) -> Result<Option<ResponseData>, RoomError> {
        self.handle_for(player_id)?.request(player_id, request).await
    }

    pub async fn get_room_info(&self, room_id: RoomId) -> Result<RoomInfo, RoomError> {
        let handle = self
            .rooms
            .get(&room_id)
            .ok_or(RoomError::NotFound(room_id))?;
        handle.get_info().await
    }

    pub fn contains_room(&self, room_id: RoomId) -> bool {
        self.rooms.contains_key(&room_id)
    }

    /// Returns the room ID a player is currently in, if any.
    pub fn player_room(&self, player_id: PlayerId) -> Option<RoomId> {
        self.player_rooms.get(&player_id).copied()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().copied().collect()
    }
}

/// Draws five-digit codes until one is free.
fn pick_room_id<R: Rng + ?Sized>(
    rng: &mut R,
    taken: impl Fn(RoomId) -> bool,
) -> Result<RoomId, RoomError> {
    for attempt in 1..=MAX_ROOM_CODE_ATTEMPTS {
        let candidate = RoomId(rng.random_range(ROOM_CODE_RANGE));
        if !taken(candidate) {
            return Ok(candidate);
        }
        tracing::debug!(room_id = %candidate, attempt, "room code collision");
    }
    Err(RoomError::RoomCodesExhausted)
}
