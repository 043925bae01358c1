//! The per-room stage machine.
//!
//! [`Game`] is plain synchronous state: every operation validates first,
//! mutates second, and queues [`Effect`]s describing what the room actor
//! has to do next (push events to players, arm timers). Nothing here
//! touches a channel or a clock, so every rule is testable in isolation.
//!
//! All completion checks funnel through one private `attempt_advance`,
//! used both by player actions and by [`Game::remove_player`]. It only
//! moves the room out of the stage it is currently in, and every move
//! bumps the room's [`Generation`], so a stage can complete at most once.

use std::time::Duration;

use guesstimate_protocol::{
    PeerAnswer, PlayerId, PlayerTokens, QuestionView, Recipient,
    ResponseData, RoomEvent, RoomId, Standing, WagerRequest,
};
use guesstimate_timer::Generation;
use tracing::{debug, info, warn};

use crate::player::validate_display_name;
use crate::settlement::{self, Settlement};
use crate::{GameConfig, Player, Question, RoomError, Stage, Wager};

/// The two deferred steps of a settled round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Show standings, one ranking timeout after settlement.
    RevealRanking,
    /// Start the next round or end the game, one timeout after that.
    AdvanceRound,
}

impl TimerKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::RevealRanking => "reveal-ranking",
            Self::AdvanceRound => "advance-round",
        }
    }
}

/// Something the room actor must do on the game's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Push an event to some or all players.
    Send(Recipient, RoomEvent),
    /// Arm a timer that calls [`Game::on_timer`] after `delay`.
    Schedule {
        delay: Duration,
        generation: Generation,
        timer: TimerKind,
    },
}

/// One room's match: roster, deck, stage, and pending effects.
#[derive(Debug)]
pub struct Game {
    room_id: RoomId,
    config: GameConfig,
    /// Join order. Ties in the rankings keep this order.
    players: Vec<Player>,
    deck: Vec<Question>,
    stage: Stage,
    round: usize,
    generation: Generation,
    settlement: Option<Settlement>,
    ranking_revealed: bool,
    effects: Vec<Effect>,
}

impl Game {
    pub fn new(room_id: RoomId, config: GameConfig, deck: Vec<Question>) -> Self {
        Self {
            room_id,
            config,
            players: Vec::new(),
            deck,
            stage: Stage::Lobby,
            round: 0,
            generation: Generation::INITIAL,
            settlement: None,
            ranking_revealed: false,
            effects: Vec::new(),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Zero-based index of the current round. Meaningless in the lobby.
    pub fn round_index(&self) -> usize {
        self.round
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Rounds this match will play: the configured limit, capped by the
    /// size of the deck.
    pub fn rounds_total(&self) -> usize {
        self.config.question_limit.min(self.deck.len())
    }

    /// Hands over everything queued since the last call.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    // -----------------------------------------------------------------------
    // Lobby
    // -----------------------------------------------------------------------

    /// Seats a new player. Only possible in the lobby.
    pub fn join(&mut self, id: PlayerId, raw_name: &str) -> Result<(), RoomError> {
        if !self.stage.is_joinable() {
            return Err(RoomError::GameInProgress(self.room_id));
        }
        if self.player(id).is_some() {
            return Err(RoomError::AlreadyInRoom(id, self.room_id));
        }
        if self.players.len() >= self.config.max_users_per_room {
            return Err(RoomError::RoomFull(self.room_id));
        }
        let name = validate_display_name(raw_name, self.config.max_username_length)?;
        let lowered = name.to_lowercase();
        if self
            .players
            .iter()
            .any(|p| p.display_name.to_lowercase() == lowered)
        {
            return Err(RoomError::DuplicateName(name));
        }

        self.players.push(Player::new(id, name));
        info!(
            room_id = %self.room_id,
            player_id = %id,
            players = self.players.len(),
            "player joined"
        );
        self.emit_roster();
        Ok(())
    }

    /// Flags the player ready to start. Starts the match once everyone is.
    pub fn set_ready(&mut self, id: PlayerId) -> Result<(), RoomError> {
        self.expect_stage("player-ready", &[Stage::Lobby])?;
        let idx = self.index_of(id)?;

        if !self.players[idx].ready {
            self.players[idx].ready = true;
            self.emit(
                Recipient::AllExcept(id),
                RoomEvent::PlayerReadyUpdated { player_id: id },
            );
        }
        self.attempt_advance();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Answering
    // -----------------------------------------------------------------------

    /// The question being played this round.
    pub fn current_question(&self, id: PlayerId) -> Result<QuestionView, RoomError> {
        const ACTION: &str = "get-question";
        self.expect_stage(
            ACTION,
            &[Stage::Answering, Stage::Voting, Stage::Settling],
        )?;
        self.index_of(id)?;
        let question = self.question(ACTION)?;
        Ok(QuestionView {
            prompt: question.prompt.clone(),
            unit: question.unit.clone(),
            round_index: self.round,
            question_count: self.rounds_total(),
        })
    }

    /// Records the player's estimate. Resubmitting overwrites it.
    pub fn submit_answer(&mut self, id: PlayerId, raw: &str) -> Result<(), RoomError> {
        self.expect_stage("submit-answer", &[Stage::Answering])?;
        let idx = self.index_of(id)?;
        let value = parse_answer(raw)?;

        let player = &mut self.players[idx];
        player.answer = Some(value);
        player.ready = true;
        debug!(room_id = %self.room_id, player_id = %id, value, "answer submitted");

        self.attempt_advance();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Voting
    // -----------------------------------------------------------------------

    /// Everyone else's answers plus the caller's balance.
    pub fn begin_voting(&mut self, id: PlayerId) -> Result<ResponseData, RoomError> {
        const ACTION: &str = "begin-voting";
        self.expect_stage(ACTION, &[Stage::Voting])?;
        let idx = self.index_of(id)?;
        let unit = self.question(ACTION)?.unit.clone();

        let token_balance = self.players[idx].ensure_tokens(self.config.default_tokens);
        let answers = self
            .players
            .iter()
            .filter(|p| p.id != id)
            .filter_map(|p| {
                p.answer.map(|answer| PeerAnswer {
                    peer_id: p.id,
                    answer,
                })
            })
            .collect();

        Ok(ResponseData::Ballot {
            answers,
            unit,
            token_balance,
        })
    }

    /// Replaces the player's wagers for this round and marks them done.
    pub fn confirm_wagers(
        &mut self,
        id: PlayerId,
        wagers: &[WagerRequest],
        declared_remaining: i64,
    ) -> Result<(), RoomError> {
        self.expect_stage("confirm-wagers", &[Stage::Voting])?;
        let idx = self.index_of(id)?;
        let balance = self.players[idx].balance(self.config.default_tokens);

        if declared_remaining < 0 {
            return Err(RoomError::InvalidWager(
                "remaining tokens cannot be negative".into(),
            ));
        }
        if declared_remaining.unsigned_abs() > u64::from(balance) {
            return Err(RoomError::InsufficientTokens {
                requested: declared_remaining.unsigned_abs(),
                available: balance,
            });
        }

        let mut total: u64 = 0;
        for (i, wager) in wagers.iter().enumerate() {
            let target = wager.target_id;
            if target == id {
                return Err(RoomError::InvalidWager(
                    "cannot wager on your own answer".into(),
                ));
            }
            if wagers[..i].iter().any(|w| w.target_id == target) {
                return Err(RoomError::InvalidWager(format!(
                    "more than one wager on {target}"
                )));
            }
            match self.player(target) {
                None => {
                    return Err(RoomError::InvalidWager(format!(
                        "{target} is not in this room"
                    )));
                }
                Some(p) if p.answer.is_none() => {
                    return Err(RoomError::InvalidWager(format!(
                        "{target} has no answer to wager on"
                    )));
                }
                Some(_) => {}
            }
            total += u64::from(wager.stake);
        }
        if total > u64::from(balance) {
            return Err(RoomError::InsufficientTokens {
                requested: total,
                available: balance,
            });
        }

        let player = &mut self.players[idx];
        player.ensure_tokens(self.config.default_tokens);
        player.wagers = wagers
            .iter()
            .map(|w| Wager {
                target: w.target_id,
                stake: w.stake,
            })
            .collect();
        player.ready = true;
        debug!(
            room_id = %self.room_id,
            player_id = %id,
            wagers = wagers.len(),
            staked = total,
            "wagers confirmed"
        );

        self.attempt_advance();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Settling / results
    // -----------------------------------------------------------------------

    /// The settled round as seen by `id`.
    pub fn voting_results(&self, id: PlayerId) -> Result<ResponseData, RoomError> {
        const ACTION: &str = "get-voting-results";
        self.expect_stage(ACTION, &[Stage::Settling])?;
        let idx = self.index_of(id)?;
        let settlement = self.settlement.as_ref().ok_or(RoomError::WrongStage {
            action: ACTION,
            stage: self.stage,
        })?;
        let default = self.config.default_tokens;

        Ok(ResponseData::VotingResults {
            correct_answer: settlement.correct_answer,
            closest_below: settlement.closest_below,
            unit: self.question(ACTION)?.unit.clone(),
            self_tokens: self.players[idx].balance(default),
            all_tokens: self
                .players
                .iter()
                .map(|p| PlayerTokens {
                    player_id: p.id,
                    display_name: p.display_name.clone(),
                    tokens: p.balance(default),
                })
                .collect(),
        })
    }

    /// Standings, richest first. Also available once the game has ended.
    pub fn rankings(&self) -> Result<Vec<Standing>, RoomError> {
        self.expect_stage(
            "get-player-rankings",
            &[Stage::Answering, Stage::Voting, Stage::Settling, Stage::Ended],
        )?;
        Ok(self.standings())
    }

    // -----------------------------------------------------------------------
    // Departures and timers
    // -----------------------------------------------------------------------

    /// Removes a player and re-checks whether the current stage is now
    /// complete. Returns how many players remain.
    ///
    /// When the last player leaves the generation is bumped so that any
    /// armed timer is stale.
    pub fn remove_player(&mut self, id: PlayerId) -> Result<usize, RoomError> {
        let idx = self.index_of(id)?;
        self.players.remove(idx);
        info!(
            room_id = %self.room_id,
            player_id = %id,
            stage = %self.stage,
            players = self.players.len(),
            "player left"
        );

        if self.players.is_empty() {
            self.generation = self.generation.next();
            return Ok(0);
        }

        self.emit(
            Recipient::All,
            RoomEvent::PlayerDisconnected { player_id: id },
        );
        self.emit_roster();
        self.attempt_advance();
        Ok(self.players.len())
    }

    /// Runs a deferred step. Returns `false` if the timer was stale.
    pub fn on_timer(&mut self, generation: Generation, kind: TimerKind) -> bool {
        if generation != self.generation || self.stage != Stage::Settling {
            debug!(
                room_id = %self.room_id,
                timer = kind.label(),
                armed = %generation,
                current = %self.generation,
                stage = %self.stage,
                "stale timer ignored"
            );
            return false;
        }

        match kind {
            TimerKind::RevealRanking => {
                if self.ranking_revealed {
                    return false;
                }
                self.ranking_revealed = true;
                let rankings = self.standings();
                self.emit(
                    Recipient::All,
                    RoomEvent::ShowIntermediateRanking {
                        round_index: self.round,
                        rankings,
                    },
                );
            }
            TimerKind::AdvanceRound => self.advance_round(),
        }
        true
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn attempt_advance(&mut self) {
        if self.players.is_empty() || !self.players.iter().all(|p| p.ready) {
            return;
        }
        match self.stage {
            Stage::Lobby => self.start_game(),
            Stage::Answering => self.open_voting(),
            Stage::Voting => self.settle_round(),
            Stage::Settling | Stage::Ended => {}
        }
    }

    /// Moves to the stage after the current one, bumps the generation, and
    /// clears readiness. `last_round` picks the branch out of `Settling`.
    ///
    /// Returns the stage entered. From `Ended` nothing changes.
    fn advance(&mut self, last_round: bool) -> Stage {
        let from = self.stage;
        let Some(to) = from.next(last_round) else {
            return from;
        };
        self.stage = to;
        self.generation = self.generation.next();
        for player in &mut self.players {
            player.ready = false;
        }
        debug!(
            room_id = %self.room_id,
            %from,
            %to,
            round = self.round,
            generation = %self.generation,
            "stage changed"
        );
        to
    }

    fn start_game(&mut self) {
        self.round = 0;
        self.advance(false);
        info!(
            room_id = %self.room_id,
            players = self.players.len(),
            rounds = self.rounds_total(),
            "game started"
        );
        self.emit(Recipient::All, RoomEvent::AllReady { round_index: 0 });
    }

    fn open_voting(&mut self) {
        let default = self.config.default_tokens;
        for player in &mut self.players {
            player.ensure_tokens(default);
        }
        self.advance(false);
        self.emit(Recipient::All, RoomEvent::AllAnswered);
    }

    fn settle_round(&mut self) {
        let Some(correct) = self.deck.get(self.round).map(|q| q.correct_answer) else {
            warn!(room_id = %self.room_id, round = self.round, "no question for round");
            return;
        };

        let result = settlement::settle(
            &mut self.players,
            correct,
            self.config.default_tokens,
            self.config.minimum_tokens,
        );
        info!(
            room_id = %self.room_id,
            round = self.round,
            correct,
            closest_below = ?result.closest_below,
            "round settled"
        );
        self.settlement = Some(result);
        self.ranking_revealed = false;
        self.advance(false);
        self.emit(Recipient::All, RoomEvent::AllVoted);

        let delay = self.config.inner_ranking_timeout;
        self.effects.push(Effect::Schedule {
            delay,
            generation: self.generation,
            timer: TimerKind::RevealRanking,
        });
        self.effects.push(Effect::Schedule {
            delay: delay * 2,
            generation: self.generation,
            timer: TimerKind::AdvanceRound,
        });
    }

    fn advance_round(&mut self) {
        let last_round = self.round + 1 >= self.rounds_total();
        if self.advance(last_round) == Stage::Ended {
            info!(room_id = %self.room_id, rounds = self.round + 1, "game ended");
            let rankings = self.standings();
            self.emit(Recipient::All, RoomEvent::GameEnded { rankings });
            return;
        }

        for player in &mut self.players {
            player.reset_round();
        }
        self.settlement = None;
        self.round += 1;
        self.emit(
            Recipient::All,
            RoomEvent::RoundAdvanced {
                round_index: self.round,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn expect_stage(&self, action: &'static str, allowed: &[Stage]) -> Result<(), RoomError> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(RoomError::WrongStage {
                action,
                stage: self.stage,
            })
        }
    }

    fn index_of(&self, id: PlayerId) -> Result<usize, RoomError> {
        self.players
            .iter()
            .position(|p| p.id == id)
            .ok_or(RoomError::NotInRoom(id))
    }

    fn question(&self, action: &'static str) -> Result<&Question, RoomError> {
        self.deck.get(self.round).ok_or(RoomError::WrongStage {
            action,
            stage: self.stage,
        })
    }

    fn standings(&self) -> Vec<Standing> {
        let default = self.config.default_tokens;
        let mut standings: Vec<Standing> = self
            .players
            .iter()
            .map(|p| Standing {
                display_name: p.display_name.clone(),
                token_balance: p.balance(default),
            })
            .collect();
        // Stable: ties keep join order.
        standings.sort_by(|a, b| b.token_balance.cmp(&a.token_balance));
        standings
    }

    fn emit_roster(&mut self) {
        let players = self.players.iter().map(Player::summary).collect();
        self.emit(Recipient::All, RoomEvent::RosterUpdated { players });
    }

    fn emit(&mut self, to: Recipient, event: RoomEvent) {
        self.effects.push(Effect::Send(to, event));
    }
}

fn parse_answer(raw: &str) -> Result<f64, RoomError> {
    let trimmed = raw.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| RoomError::InvalidAnswer(format!("\"{trimmed}\" is not a number")))?;
    if !value.is_finite() {
        return Err(RoomError::InvalidAnswer("answer must be a finite number".into()));
    }
    if value < 0.0 {
        return Err(RoomError::InvalidAnswer("answer cannot be negative".into()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM: RoomId = RoomId(12345);

    fn pid(id: u64) -> PlayerId {
        PlayerId(id)
    }

    fn question(prompt: &str, answer: f64, unit: &str) -> Question {
        Question {
            prompt: prompt.into(),
            correct_answer: answer,
            unit: unit.into(),
        }
    }

    fn deck() -> Vec<Question> {
        vec![
            question("How tall?", 100.0, "m"),
            question("How heavy?", 200.0, "kg"),
            question("How far?", 300.0, "km"),
        ]
    }

    fn config() -> GameConfig {
        GameConfig {
            question_limit: 2,
            max_users_per_room: 4,
            ..GameConfig::default()
        }
    }

    fn lobby(n: u64) -> Game {
        let mut game = Game::new(ROOM, config(), deck());
        for i in 1..=n {
            game.join(pid(i), &format!("player{i}")).unwrap();
        }
        game.take_effects();
        game
    }

    fn started(n: u64) -> Game {
        let mut game = lobby(n);
        for i in 1..=n {
            game.set_ready(pid(i)).unwrap();
        }
        game.take_effects();
        game
    }

    /// A game in `Voting`, where player `i + 1` answered `answers[i]`.
    fn voting(answers: &[f64]) -> Game {
        let mut game = started(answers.len() as u64);
        for (i, answer) in answers.iter().enumerate() {
            game.submit_answer(pid(i as u64 + 1), &answer.to_string())
                .unwrap();
        }
        assert_eq!(game.stage(), Stage::Voting);
        game.take_effects();
        game
    }

    fn settled(answers: &[f64]) -> Game {
        let mut game = voting(answers);
        for i in 1..=answers.len() as u64 {
            game.confirm_wagers(pid(i), &[], 0).unwrap();
        }
        assert_eq!(game.stage(), Stage::Settling);
        game.take_effects();
        game
    }

    fn wager(target: u64, stake: u32) -> WagerRequest {
        WagerRequest {
            target_id: pid(target),
            stake,
        }
    }

    fn events(effects: &[Effect]) -> Vec<RoomEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(_, event) => Some(event.clone()),
                Effect::Schedule { .. } => None,
            })
            .collect()
    }

    fn count(effects: &[Effect], wanted: &RoomEvent) -> usize {
        events(effects).iter().filter(|e| *e == wanted).count()
    }

    // --- lobby ----------------------------------------------------------

    #[test]
    fn test_join_broadcasts_roster() {
        let mut game = Game::new(ROOM, config(), deck());
        game.join(pid(1), "  Ada  ").unwrap();

        let effects = game.take_effects();
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::Send(Recipient::All, RoomEvent::RosterUpdated { players }) => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].display_name, "Ada");
            }
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn test_join_rejections_are_distinct_and_leave_roster_alone() {
        let mut game = lobby(4);

        let full = game.join(pid(9), "late").unwrap_err();
        assert!(matches!(full, RoomError::RoomFull(_)));

        let mut game2 = lobby(2);
        let dup = game2.join(pid(9), "PLAYER1").unwrap_err();
        assert!(matches!(dup, RoomError::DuplicateName(_)));
        let empty = game2.join(pid(9), "   ").unwrap_err();
        assert!(matches!(empty, RoomError::InvalidName(_)));

        let mut game3 = started(2);
        let in_progress = game3.join(pid(9), "late").unwrap_err();
        assert!(matches!(in_progress, RoomError::GameInProgress(_)));

        let messages = [
            full.to_string(),
            dup.to_string(),
            in_progress.to_string(),
        ];
        assert_ne!(messages[0], messages[1]);
        assert_ne!(messages[1], messages[2]);
        assert_ne!(messages[0], messages[2]);

        assert_eq!(game.player_count(), 4);
        assert_eq!(game2.player_count(), 2);
        assert_eq!(game3.player_count(), 2);
        assert!(game2.take_effects().is_empty());
    }

    #[test]
    fn test_join_same_player_twice_is_rejected() {
        let mut game = lobby(1);
        assert!(matches!(
            game.join(pid(1), "again"),
            Err(RoomError::AlreadyInRoom(..))
        ));
    }

    #[test]
    fn test_game_starts_only_when_everyone_is_ready() {
        let mut game = lobby(3);
        game.set_ready(pid(1)).unwrap();
        game.set_ready(pid(2)).unwrap();
        assert_eq!(game.stage(), Stage::Lobby);

        let effects = game.take_effects();
        assert!(effects.contains(&Effect::Send(
            Recipient::AllExcept(pid(1)),
            RoomEvent::PlayerReadyUpdated { player_id: pid(1) },
        )));

        game.set_ready(pid(3)).unwrap();
        assert_eq!(game.stage(), Stage::Answering);
        assert_eq!(game.round_index(), 0);
        assert!(game.players().iter().all(|p| !p.ready));
        assert_eq!(
            count(&game.take_effects(), &RoomEvent::AllReady { round_index: 0 }),
            1
        );
    }

    #[test]
    fn test_ready_twice_does_not_rebroadcast() {
        let mut game = lobby(2);
        game.set_ready(pid(1)).unwrap();
        game.take_effects();
        game.set_ready(pid(1)).unwrap();
        assert!(game.take_effects().is_empty());
    }

    #[test]
    fn test_ready_is_lobby_only() {
        let mut game = started(2);
        assert!(matches!(
            game.set_ready(pid(1)),
            Err(RoomError::WrongStage { .. })
        ));
    }

    #[test]
    fn test_lobby_departure_can_start_the_game() {
        let mut game = lobby(3);
        game.set_ready(pid(1)).unwrap();
        game.set_ready(pid(2)).unwrap();
        game.take_effects();

        assert_eq!(game.remove_player(pid(3)).unwrap(), 2);

        assert_eq!(game.stage(), Stage::Answering);
        let events = events(&game.take_effects());
        assert_eq!(
            events[0],
            RoomEvent::PlayerDisconnected { player_id: pid(3) }
        );
        assert!(matches!(events[1], RoomEvent::RosterUpdated { .. }));
        assert_eq!(events[2], RoomEvent::AllReady { round_index: 0 });
    }

    // --- stage guards ---------------------------------------------------

    #[test]
    fn test_round_actions_are_rejected_in_lobby() {
        let mut game = lobby(2);
        assert!(game.submit_answer(pid(1), "5").is_err());
        assert!(game.begin_voting(pid(1)).is_err());
        assert!(game.confirm_wagers(pid(1), &[], 0).is_err());
        assert!(game.voting_results(pid(1)).is_err());
        assert!(game.current_question(pid(1)).is_err());
        assert!(matches!(
            game.rankings(),
            Err(RoomError::WrongStage { stage: Stage::Lobby, .. })
        ));
    }

    #[test]
    fn test_round_actions_are_rejected_after_the_end_but_rankings_remain() {
        let mut game = settled(&[1.0]);
        let generation = game.generation();
        assert!(game.on_timer(generation, TimerKind::AdvanceRound));
        let generation = game.generation();
        game.submit_answer(pid(1), "1").unwrap();
        game.confirm_wagers(pid(1), &[], 0).unwrap();
        let generation_after = game.generation();
        assert_ne!(generation, generation_after);
        assert!(game.on_timer(generation_after, TimerKind::AdvanceRound));
        assert_eq!(game.stage(), Stage::Ended);

        assert!(game.submit_answer(pid(1), "5").is_err());
        assert!(game.begin_voting(pid(1)).is_err());
        assert!(game.voting_results(pid(1)).is_err());
        assert!(game.current_question(pid(1)).is_err());
        assert_eq!(game.rankings().unwrap().len(), 1);
    }

    #[test]
    fn test_current_question_reports_round_and_count() {
        let game = started(1);
        let view = game.current_question(pid(1)).unwrap();
        assert_eq!(view.prompt, "How tall?");
        assert_eq!(view.unit, "m");
        assert_eq!(view.round_index, 0);
        assert_eq!(view.question_count, 2);
    }

    #[test]
    fn test_actions_from_strangers_are_rejected() {
        let mut game = started(2);
        assert!(matches!(
            game.submit_answer(pid(42), "5"),
            Err(RoomError::NotInRoom(_))
        ));
    }

    // --- answering ------------------------------------------------------

    #[test]
    fn test_invalid_answers_do_not_mutate() {
        let mut game = started(2);
        for raw in ["abc", "", "-3", "inf", "NaN", "1e999"] {
            let err = game.submit_answer(pid(1), raw).unwrap_err();
            assert!(matches!(err, RoomError::InvalidAnswer(_)), "{raw}");
        }
        assert_eq!(game.player(pid(1)).unwrap().answer, None);
        assert!(!game.player(pid(1)).unwrap().ready);
        assert!(game.take_effects().is_empty());
    }

    #[test]
    fn test_resubmitting_overwrites_the_answer() {
        let mut game = started(2);
        game.submit_answer(pid(1), "10").unwrap();
        game.submit_answer(pid(1), " 12.5 ").unwrap();
        assert_eq!(game.player(pid(1)).unwrap().answer, Some(12.5));
        assert_eq!(game.stage(), Stage::Answering);
    }

    #[test]
    fn test_answering_completes_exactly_once_on_last_answer() {
        let mut game = started(3);
        game.submit_answer(pid(1), "1").unwrap();
        game.submit_answer(pid(2), "2").unwrap();
        assert_eq!(game.stage(), Stage::Answering);
        assert_eq!(count(&game.take_effects(), &RoomEvent::AllAnswered), 0);

        game.submit_answer(pid(3), "3").unwrap();
        assert_eq!(game.stage(), Stage::Voting);
        assert_eq!(count(&game.take_effects(), &RoomEvent::AllAnswered), 1);

        // A late duplicate cannot fire the transition again.
        assert!(game.submit_answer(pid(3), "4").is_err());
        assert!(game.take_effects().is_empty());
    }

    #[test]
    fn test_departure_completes_answering_exactly_once() {
        let mut game = started(3);
        game.submit_answer(pid(1), "1").unwrap();
        game.submit_answer(pid(2), "2").unwrap();
        game.take_effects();

        game.remove_player(pid(3)).unwrap();
        assert_eq!(game.stage(), Stage::Voting);
        assert_eq!(count(&game.take_effects(), &RoomEvent::AllAnswered), 1);

        game.remove_player(pid(2)).unwrap();
        assert_eq!(game.stage(), Stage::Voting);
        assert_eq!(count(&game.take_effects(), &RoomEvent::AllAnswered), 0);
    }

    #[test]
    fn test_balances_are_initialized_when_voting_opens() {
        let game = voting(&[1.0, 2.0]);
        assert!(game.players().iter().all(|p| p.tokens == Some(100)));
    }

    // --- voting ---------------------------------------------------------

    #[test]
    fn test_begin_voting_lists_only_other_answers() {
        let mut game = voting(&[10.0, 20.0, 30.0]);
        let ResponseData::Ballot {
            answers,
            unit,
            token_balance,
        } = game.begin_voting(pid(2)).unwrap()
        else {
            panic!("expected ballot");
        };
        assert_eq!(unit, "m");
        assert_eq!(token_balance, 100);
        assert_eq!(
            answers,
            vec![
                PeerAnswer {
                    peer_id: pid(1),
                    answer: 10.0
                },
                PeerAnswer {
                    peer_id: pid(3),
                    answer: 30.0
                },
            ]
        );
    }

    #[test]
    fn test_declared_remaining_must_be_within_balance() {
        let mut game = voting(&[10.0, 20.0]);
        assert!(matches!(
            game.confirm_wagers(pid(1), &[], -1),
            Err(RoomError::InvalidWager(_))
        ));
        assert!(matches!(
            game.confirm_wagers(pid(1), &[], 101),
            Err(RoomError::InsufficientTokens {
                requested: 101,
                available: 100
            })
        ));
        assert!(!game.player(pid(1)).unwrap().ready);

        game.confirm_wagers(pid(1), &[], 100).unwrap();
        assert!(game.player(pid(1)).unwrap().ready);
    }

    #[test]
    fn test_wager_targets_are_validated() {
        let mut game = voting(&[10.0, 20.0, 30.0]);

        let self_target = game.confirm_wagers(pid(1), &[wager(1, 5)], 95);
        assert!(matches!(self_target, Err(RoomError::InvalidWager(_))));

        let duplicate = game.confirm_wagers(pid(1), &[wager(2, 5), wager(2, 5)], 90);
        assert!(matches!(duplicate, Err(RoomError::InvalidWager(_))));

        let stranger = game.confirm_wagers(pid(1), &[wager(77, 5)], 95);
        assert!(matches!(stranger, Err(RoomError::InvalidWager(_))));

        let over = game.confirm_wagers(pid(1), &[wager(2, 60), wager(3, 50)], 0);
        assert!(matches!(
            over,
            Err(RoomError::InsufficientTokens {
                requested: 110,
                available: 100
            })
        ));

        assert!(game.player(pid(1)).unwrap().wagers.is_empty());
        assert_eq!(game.stage(), Stage::Voting);
    }

    #[test]
    fn test_confirm_wagers_retry_replaces_previous_set() {
        let mut game = voting(&[10.0, 20.0, 30.0]);
        game.confirm_wagers(pid(1), &[wager(2, 30)], 70).unwrap();
        game.confirm_wagers(pid(1), &[wager(2, 30)], 70).unwrap();
        assert_eq!(game.player(pid(1)).unwrap().wagers.len(), 1);

        game.confirm_wagers(pid(1), &[wager(3, 5)], 95).unwrap();
        assert_eq!(
            game.player(pid(1)).unwrap().wagers,
            vec![Wager {
                target: pid(3),
                stake: 5
            }]
        );
        assert_eq!(game.stage(), Stage::Voting);
    }

    #[test]
    fn test_last_confirmation_settles_and_arms_both_timers() {
        let mut game = voting(&[50.0, 100.0, 90.0, 70.0]);
        game.confirm_wagers(pid(1), &[wager(2, 10), wager(3, 10), wager(4, 10)], 70)
            .unwrap();
        game.confirm_wagers(pid(2), &[], 100).unwrap();
        game.confirm_wagers(pid(3), &[], 100).unwrap();
        game.take_effects();

        game.confirm_wagers(pid(4), &[], 100).unwrap();

        assert_eq!(game.stage(), Stage::Settling);
        assert_eq!(game.player(pid(1)).unwrap().tokens, Some(125));

        let effects = game.take_effects();
        let generation = game.generation();
        assert_eq!(count(&effects, &RoomEvent::AllVoted), 1);
        assert!(effects.contains(&Effect::Schedule {
            delay: Duration::from_secs(5),
            generation,
            timer: TimerKind::RevealRanking,
        }));
        assert!(effects.contains(&Effect::Schedule {
            delay: Duration::from_secs(10),
            generation,
            timer: TimerKind::AdvanceRound,
        }));

        let ResponseData::VotingResults {
            correct_answer,
            closest_below,
            self_tokens,
            all_tokens,
            ..
        } = game.voting_results(pid(1)).unwrap()
        else {
            panic!("expected voting results");
        };
        assert_eq!(correct_answer, 100.0);
        assert_eq!(closest_below, Some(90.0));
        assert_eq!(self_tokens, 125);
        assert_eq!(all_tokens.len(), 4);
    }

    #[test]
    fn test_wagers_on_departed_target_are_void() {
        let mut game = voting(&[50.0, 100.0, 10.0]);
        game.confirm_wagers(pid(1), &[wager(2, 40)], 60).unwrap();
        game.confirm_wagers(pid(3), &[], 100).unwrap();

        game.remove_player(pid(2)).unwrap();

        assert_eq!(game.stage(), Stage::Settling);
        assert_eq!(game.player(pid(1)).unwrap().tokens, Some(100));
    }

    // --- settling and timers ---------------------------------------------

    #[test]
    fn test_timers_reveal_then_advance_by_one_round() {
        let mut game = settled(&[1.0, 2.0]);
        let generation = game.generation();

        assert!(game.on_timer(generation, TimerKind::RevealRanking));
        let events = events(&game.take_effects());
        assert!(matches!(
            events.as_slice(),
            [RoomEvent::ShowIntermediateRanking { round_index: 0, .. }]
        ));
        assert!(!game.on_timer(generation, TimerKind::RevealRanking));

        assert!(game.on_timer(generation, TimerKind::AdvanceRound));
        assert_eq!(game.stage(), Stage::Answering);
        assert_eq!(game.round_index(), 1);
        assert!(game.players().iter().all(|p| p.answer.is_none()));
        assert!(game.players().iter().all(|p| p.wagers.is_empty()));
        assert_eq!(
            events_of(&mut game),
            vec![RoomEvent::RoundAdvanced { round_index: 1 }]
        );

        // The advance timer is now stale.
        assert!(!game.on_timer(generation, TimerKind::AdvanceRound));
        assert_eq!(game.round_index(), 1);
    }

    fn events_of(game: &mut Game) -> Vec<RoomEvent> {
        events(&game.take_effects())
    }

    #[test]
    fn test_last_round_ends_the_game() {
        let mut game = settled(&[1.0]);
        assert!(game.on_timer(game.generation(), TimerKind::AdvanceRound));
        game.take_effects();
        game.submit_answer(pid(1), "200").unwrap();
        game.confirm_wagers(pid(1), &[], 0).unwrap();
        game.take_effects();

        assert!(game.on_timer(game.generation(), TimerKind::AdvanceRound));

        assert_eq!(game.stage(), Stage::Ended);
        assert_eq!(game.round_index(), 1);
        assert!(matches!(
            events_of(&mut game).as_slice(),
            [RoomEvent::GameEnded { .. }]
        ));
    }

    #[test]
    fn test_short_deck_caps_the_number_of_rounds() {
        let config = GameConfig {
            question_limit: 10,
            ..config()
        };
        let mut game = Game::new(ROOM, config, deck()[..1].to_vec());
        game.join(pid(1), "solo").unwrap();
        game.set_ready(pid(1)).unwrap();
        game.submit_answer(pid(1), "5").unwrap();
        game.confirm_wagers(pid(1), &[], 0).unwrap();
        assert_eq!(game.rounds_total(), 1);

        assert!(game.on_timer(game.generation(), TimerKind::AdvanceRound));
        assert_eq!(game.stage(), Stage::Ended);
    }

    #[test]
    fn test_full_game_follows_the_stage_cycle() {
        let mut game = lobby(2);
        let mut seen = vec![(game.stage(), game.generation())];
        let mut record = |game: &Game| seen.push((game.stage(), game.generation()));

        for player in 1..=2 {
            game.set_ready(pid(player)).unwrap();
        }
        record(&game);
        for round in 0..game.rounds_total() {
            assert_eq!(game.round_index(), round);
            for player in 1..=2 {
                game.submit_answer(pid(player), "150").unwrap();
            }
            record(&game);
            for player in 1..=2 {
                game.confirm_wagers(pid(player), &[], 0).unwrap();
            }
            record(&game);
            assert!(game.on_timer(game.generation(), TimerKind::AdvanceRound));
            record(&game);
        }

        let stages: Vec<Stage> = seen.iter().map(|(stage, _)| *stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Lobby,
                Stage::Answering,
                Stage::Voting,
                Stage::Settling,
                Stage::Answering,
                Stage::Voting,
                Stage::Settling,
                Stage::Ended,
            ]
        );
        let settlings = stages.iter().filter(|s| **s == Stage::Settling).count();
        let mut settled = 0;
        for pair in seen.windows(2) {
            let ((from, before), (to, after)) = (pair[0], pair[1]);
            if from == Stage::Settling {
                settled += 1;
            }
            assert_eq!(from.next(settled == settlings), Some(to));
            assert_ne!(before, after);
        }
    }

    #[test]
    fn test_timer_ignored_outside_settling() {
        let mut game = voting(&[1.0, 2.0]);
        let generation = game.generation();
        assert!(!game.on_timer(generation, TimerKind::AdvanceRound));
        assert_eq!(game.stage(), Stage::Voting);
    }

    #[test]
    fn test_last_departure_makes_timers_stale() {
        let mut game = settled(&[1.0, 2.0]);
        let armed = game.generation();

        game.remove_player(pid(1)).unwrap();
        assert_eq!(game.remove_player(pid(2)).unwrap(), 0);
        assert!(game.is_empty());
        assert!(game.take_effects().iter().all(|e| !matches!(
            e,
            Effect::Send(_, RoomEvent::PlayerDisconnected { player_id }) if *player_id == pid(2)
        )));

        assert!(!game.on_timer(armed, TimerKind::RevealRanking));
        assert!(!game.on_timer(armed, TimerKind::AdvanceRound));
    }

    #[test]
    fn test_rankings_sort_descending_and_keep_join_order_on_ties() {
        let mut game = voting(&[100.0, 1.0, 2.0]);
        game.confirm_wagers(pid(2), &[wager(1, 50)], 50).unwrap();
        game.confirm_wagers(pid(1), &[], 100).unwrap();
        game.confirm_wagers(pid(3), &[], 100).unwrap();

        let rankings = game.rankings().unwrap();
        let names: Vec<&str> = rankings.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, vec!["player2", "player1", "player3"]);
        assert_eq!(rankings[0].token_balance, 200);
        assert_eq!(rankings[1].token_balance, 100);
    }

    #[test]
    fn test_round_index_never_moves_without_settlement() {
        let mut game = started(2);
        game.submit_answer(pid(1), "1").unwrap();
        game.remove_player(pid(2)).unwrap();
        assert_eq!(game.round_index(), 0);
        game.confirm_wagers(pid(1), &[], 0).unwrap();
        assert_eq!(game.round_index(), 0);
        assert_eq!(game.stage(), Stage::Settling);
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("42").unwrap(), 42.0);
        assert_eq!(parse_answer(" 0.5 ").unwrap(), 0.5);
        assert_eq!(parse_answer("0").unwrap(), 0.0);
        assert!(parse_answer("-0.1").is_err());
        assert!(parse_answer("12abc").is_err());
    }
}
