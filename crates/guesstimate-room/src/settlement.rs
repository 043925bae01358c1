//! Wager settlement: pure arithmetic over one round's answers and wagers.

use guesstimate_protocol::PlayerId;

use crate::Player;

/// Relative distance below the correct answer that still pays out 1:1.
const NEAR_MISS_RATIO: f64 = 0.25;

/// How a single wager resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payout {
    /// The target hit the answer exactly: `+2 × stake`.
    Exact,
    /// The target had the highest answer below the correct one:
    /// `+1.5 × stake`, rounded down.
    ClosestBelow,
    /// The target undershot by at most a quarter: `+stake`.
    Near,
    /// Anything else: `-stake`.
    Miss,
}

impl Payout {
    pub fn classify(value: f64, correct: f64, closest: Option<f64>) -> Self {
        if value == correct {
            return Self::Exact;
        }
        if closest == Some(value) {
            return Self::ClosestBelow;
        }
        if correct > 0.0 {
            let relative = (correct - value) / correct;
            if relative > 0.0 && relative <= NEAR_MISS_RATIO {
                return Self::Near;
            }
        }
        Self::Miss
    }

    /// Signed token change for `stake`.
    pub fn delta(self, stake: u32) -> i64 {
        let stake = i64::from(stake);
        match self {
            Self::Exact => 2 * stake,
            Self::ClosestBelow => stake * 3 / 2,
            Self::Near => stake,
            Self::Miss => -stake,
        }
    }
}

/// The largest answer short of `correct`, if any.
///
/// Exact hits are excluded: they already pay the exact tier, and the
/// closest-below bonus goes to the best of the rest.
pub fn closest_below(
    correct: f64,
    answers: impl IntoIterator<Item = f64>,
) -> Option<f64> {
    answers
        .into_iter()
        .filter(|a| *a < correct)
        .fold(None, |best, a| match best {
            Some(b) if b >= a => Some(b),
            _ => Some(a),
        })
}

/// What one round's settlement did.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub correct_answer: f64,
    pub closest_below: Option<f64>,
    /// Net change per player before clamping, in roster order.
    pub deltas: Vec<(PlayerId, i64)>,
}

/// Applies every player's wagers to their balance.
///
/// Unset balances start at `default_tokens`. Wagers on a player who is no
/// longer in `players`, or who never answered, are void. Every balance is
/// clamped to at least `minimum_tokens` afterwards.
pub fn settle(
    players: &mut [Player],
    correct: f64,
    default_tokens: u32,
    minimum_tokens: u32,
) -> Settlement {
    let answers: Vec<(PlayerId, f64)> = players
        .iter()
        .filter_map(|p| p.answer.map(|a| (p.id, a)))
        .collect();
    let closest = closest_below(correct, answers.iter().map(|(_, a)| *a));

    let mut deltas = Vec::with_capacity(players.len());
    for player in players.iter_mut() {
        let delta: i64 = player
            .wagers
            .iter()
            .filter_map(|w| {
                let (_, value) =
                    answers.iter().find(|(id, _)| *id == w.target)?;
                Some(Payout::classify(*value, correct, closest).delta(w.stake))
            })
            .sum();

        let balance = i64::from(player.ensure_tokens(default_tokens)) + delta;
        let clamped = balance.max(i64::from(minimum_tokens));
        player.tokens = Some(u32::try_from(clamped).unwrap_or(u32::MAX));
        deltas.push((player.id, delta));
    }

    Settlement {
        correct_answer: correct,
        closest_below: closest,
        deltas,
    }
}
