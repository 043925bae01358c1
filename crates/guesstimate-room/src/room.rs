//! Room actor: an isolated Tokio task that owns one [`Game`].
//!
//! Each room runs in its own task, communicating with the outside world
//! through an mpsc channel. Player requests, departures, and timer
//! callbacks all arrive on that one channel, so everything that happens
//! to a room is applied in order, one command at a time.

use std::collections::HashMap;

use guesstimate_protocol::{
    PlayerId, Recipient, ResponseData, RoomEvent, RoomId, WagerRequest,
};
use guesstimate_timer::{Generation, TimerSet};
use tokio::sync::{mpsc, oneshot};

use crate::game::{Effect, Game, TimerKind};
use crate::{RoomError, Stage};

/// Channel sender for delivering room events to a player's connection.
pub type PlayerSender = mpsc::UnboundedSender<RoomEvent>;

/// An in-room action on behalf of a seated player.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomRequest {
    Ready,
    Question,
    SubmitAnswer(String),
    BeginVoting,
    ConfirmWagers {
        wagers: Vec<WagerRequest>,
        declared_remaining_tokens: i64,
    },
    VotingResults,
    Rankings,
}

impl RoomRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "player-ready",
            Self::Question => "get-question",
            Self::SubmitAnswer(_) => "submit-answer",
            Self::BeginVoting => "begin-voting",
            Self::ConfirmWagers { .. } => "confirm-wagers",
            Self::VotingResults => "get-voting-results",
            Self::Rankings => "get-player-rankings",
        }
    }
}

/// What happened to the room when a player left it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Players are still seated.
    Remaining(usize),
    /// That was the last player. The actor has stopped.
    Vacated,
}

/// Commands sent to a room actor through its channel.
///
/// The `oneshot::Sender` in some variants is a reply channel: the caller
/// sends a command and waits for the response on it.
pub(crate) enum RoomCommand {
    Join {
        player_id: PlayerId,
        display_name: String,
        sender: PlayerSender,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    Leave {
        player_id: PlayerId,
        reply: oneshot::Sender<Result<LeaveOutcome, RoomError>>,
    },

    Request {
        player_id: PlayerId,
        request: RoomRequest,
        reply: oneshot::Sender<Result<Option<ResponseData>, RoomError>>,
    },

    /// Sent by the room's own scheduled tasks.
    Timer {
        generation: Generation,
        kind: TimerKind,
    },

    GetInfo {
        reply: oneshot::Sender<RoomInfo>,
    },

    Shutdown,
}

/// A snapshot of room metadata.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub stage: Stage,
    pub round_index: usize,
    pub player_count: usize,
    pub max_players: usize,
    pub generation: Generation,
    /// Timers armed and not yet fired or cancelled.
    pub pending_timers: usize,
}

/// Handle to a running room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn join(
        &self,
        player_id: PlayerId,
        display_name: String,
        sender: PlayerSender,
    ) -> Result<(), RoomError> {
        self.call(|reply| RoomCommand::Join {
            player_id,
            display_name,
            sender,
            reply,
        })
        .await?
    }

    pub async fn leave(&self, player_id: PlayerId) -> Result<LeaveOutcome, RoomError> {
        self.call(|reply| RoomCommand::Leave { player_id, reply })
            .await?
    }

    /// Runs an in-room action and returns its payload, if it has one.
    pub async fn request(
        &self,
        player_id: PlayerId,
        request: RoomRequest,
    ) -> Result<Option<ResponseData>, RoomError> {
        self.call(|reply| RoomCommand::Request {
            player_id,
            request,
            reply,
        })
        .await?
    }

    pub async fn get_info(&self) -> Result<RoomInfo, RoomError> {
        self.call(|reply| RoomCommand::GetInfo { reply }).await
    }

    /// Tells the room to stop. Pending timers are cancelled.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Shutdown)
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor {
    game: Game,
    /// Per-player event channels.
    senders: HashMap<PlayerId, PlayerSender>,
    timers: TimerSet,
    receiver: mpsc::Receiver<RoomCommand>,
    /// For arming timers. Weak so that the actor alone never keeps its
    /// own channel open.
    timer_tx: mpsc::WeakSender<RoomCommand>,
}

impl RoomActor {
    async fn run(mut self) {
        let room_id = self.game.room_id();
        tracing::info!(%room_id, "room actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RoomCommand::Join {
                    player_id,
                    display_name,
                    sender,
                    reply,
                } => {
                    let result = self.game.join(player_id, &display_name);
                    if result.is_ok() {
                        self.senders.insert(player_id, sender);
                    }
                    self.flush();
                    let _ = reply.send(result);
                }
                RoomCommand::Leave { player_id, reply } => {
                    self.senders.remove(&player_id);
                    let result = self.game.remove_player(player_id);
                    self.flush();
                    match result {
                        Ok(0) => {
                            let cancelled = self.timers.cancel_all();
                            tracing::info!(%room_id, cancelled, "room vacated");
                            let _ = reply.send(Ok(LeaveOutcome::Vacated));
                            break;
                        }
                        Ok(remaining) => {
                            let _ = reply.send(Ok(LeaveOutcome::Remaining(remaining)));
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e));
                        }
                    }
                }
                RoomCommand::Request {
                    player_id,
                    request,
                    reply,
                } => {
                    let action = request.name();
                    let result = self.handle_request(player_id, request);
                    if let Err(e) = &result {
                        tracing::debug!(
                            %room_id,
                            %player_id,
                            action,
                            error = %e,
                            "request rejected"
                        );
                    }
                    self.flush();
                    let _ = reply.send(result);
                }
                RoomCommand::Timer { generation, kind } => {
                    if self.game.on_timer(generation, kind) {
                        tracing::debug!(%room_id, timer = kind.label(), %generation, "timer fired");
                        self.flush();
                    }
                }
                RoomCommand::GetInfo { reply } => {
                    let _ = reply.send(self.info());
                }
                RoomCommand::Shutdown => {
                    tracing::info!(%room_id, "room shutting down");
                    break;
                }
            }
        }

        self.timers.cancel_all();
        tracing::info!(%room_id, "room actor stopped");
    }

    fn handle_request(
        &mut self,
        player_id: PlayerId,
        request: RoomRequest,
    ) -> Result<Option<ResponseData>, RoomError> {
        let game = &mut self.game;
        match request {
            RoomRequest::Ready => game.set_ready(player_id).map(|()| None),
            RoomRequest::Question => game
                .current_question(player_id)
                .map(|view| Some(ResponseData::Question(view))),
            RoomRequest::SubmitAnswer(raw) => {
                game.submit_answer(player_id, &raw).map(|()| None)
            }
            RoomRequest::BeginVoting => game.begin_voting(player_id).map(Some),
            RoomRequest::ConfirmWagers {
                wagers,
                declared_remaining_tokens,
            } => game
                .confirm_wagers(player_id, &wagers, declared_remaining_tokens)
                .map(|()| None),
            RoomRequest::VotingResults => game.voting_results(player_id).map(Some),
            RoomRequest::Rankings => game
                .rankings()
                .map(|rankings| Some(ResponseData::Rankings { rankings })),
        }
    }

    /// Cancels timers from past generations, then carries out whatever the
    /// game queued.
    fn flush(&mut self) {
        let effects = self.game.take_effects();
        self.timers.retain_generation(self.game.generation());

        for effect in effects {
            match effect {
                Effect::Send(recipient, event) => self.dispatch(recipient, event),
                Effect::Schedule {
                    delay,
                    generation,
                    timer,
                } => match self.timer_tx.upgrade() {
                    Some(tx) => self.timers.schedule(
                        delay,
                        generation,
                        timer.label(),
                        tx,
                        RoomCommand::Timer {
                            generation,
                            kind: timer,
                        },
                    ),
                    None => tracing::warn!(
                        room_id = %self.game.room_id(),
                        timer = timer.label(),
                        "room channel closed, timer not armed"
                    ),
                },
            }
        }
    }

    /// Sends an event to the addressed players in join order. A player
    /// whose connection has gone away is skipped silently.
    fn dispatch(&self, recipient: Recipient, event: RoomEvent) {
        for player in self.game.players() {
            let addressed = match recipient {
                Recipient::All => true,
                Recipient::Player(id) => player.id == id,
                Recipient::AllExcept(id) => player.id != id,
            };
            if addressed {
                if let Some(sender) = self.senders.get(&player.id) {
                    let _ = sender.send(event.clone());
                }
            }
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.game.room_id(),
            stage: self.game.stage(),
            round_index: self.game.round_index(),
            player_count: self.game.player_count(),
            max_players: self.game.config().max_users_per_room,
            generation: self.game.generation(),
            pending_timers: self.timers.pending(),
        }
    }
}

/// Spawns a new room actor task and returns a handle to communicate with it.
///
/// `channel_size` controls backpressure: if the channel fills up, senders
/// wait.
pub(crate) fn spawn_room(game: Game, channel_size: usize) -> RoomHandle {
    let room_id = game.room_id();
    let (tx, rx) = mpsc::channel(channel_size);

    let actor = RoomActor {
        game,
        senders: HashMap::new(),
        timers: TimerSet::new(),
        receiver: rx,
        timer_tx: tx.downgrade(),
    };

    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_full_channel_waits_and_stopped_actor_is_unavailable() {
        let (tx, rx) = mpsc::channel(1);
        let handle = RoomHandle {
            room_id: RoomId(12345),
            sender: tx.clone(),
        };
        assert!(tx.try_send(RoomCommand::Shutdown).is_ok());

        let waited = tokio::time::timeout(Duration::from_millis(50), handle.get_info()).await;
        assert!(waited.is_err(), "a full channel should apply backpressure");

        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.get_info().await,
            Err(RoomError::Unavailable(RoomId(12345)))
        ));
    }
}
