use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};

use crate::actions::SessionId;
use crate::errors::{GameError, GameResult};

/// Lowest target (and lowest accepted guess)
pub const TARGET_MIN: f64 = 1.0;
/// Upper bound for guesses. Targets are always strictly below it.
pub const TARGET_MAX: f64 = 10.0;
pub const MAX_DISPLAY_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: SessionId,
    pub display_name: String,
    /// Last submitted guess, display only
    pub score: f64,
    pub wins: u32,
    /// Milliseconds since the UNIX epoch
    pub joined_at: u64,
}

impl Player {
    pub fn new(id: impl Into<SessionId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            score: 0.0,
            wins: 0,
            joined_at: now_millis(),
        }
    }
}

/// A player annotated with the distance between its last guess and the target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    #[serde(flatten)]
    pub player: Player,
    pub difference: f64,
}

/// The shared, authoritative state every client sees
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameState {
    /// Join order; drives turn rotation and ranking ties
    pub players: Vec<Player>,
    /// Players by wins, highest first. Only recomputed when a round ends.
    pub ranking: Vec<Player>,
    pub target_value: f64,
    pub active_turn: Option<SessionId>,
    pub round: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessOutcome {
    /// Exact match: the round ended and a new target was rolled
    Hit,
    Miss,
}

/// Owns the game state and the generator used to roll targets.
pub struct Game {
    state: GameState,
    rng: XorShiftRng,
}

impl Game {
    pub fn new(mut rng: XorShiftRng) -> Self {
        let target_value = roll_target(&mut rng);
        Self {
            state: GameState {
                players: Vec::new(),
                ranking: Vec::new(),
                target_value,
                active_turn: None,
                round: 1,
            },
            rng,
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(XorShiftRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(XorShiftRng::seed_from_u64(seed))
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn snapshot(&self) -> GameState {
        self.state.clone()
    }

    pub fn players(&self) -> &[Player] {
        &self.state.players
    }

    pub fn player(&self, session_id: &str) -> Option<&Player> {
        self.state.players.iter().find(|p| p.id == session_id)
    }

    pub fn is_joined(&self, session_id: &str) -> bool {
        self.player(session_id).is_some()
    }

    /// Add a player for `session_id`. The first player to join an empty
    /// table takes the turn.
    pub fn join(&mut self, session_id: &str, display_name: &str) -> GameResult<Player> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(GameError::invalid_display_name("name is empty"));
        }
        if display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(GameError::invalid_display_name(format!(
                "name is longer than {MAX_DISPLAY_NAME_LEN} characters"
            )));
        }
        if self.is_joined(session_id) {
            return Err(GameError::AlreadyJoined {
                session_id: session_id.to_string(),
            });
        }

        let player = Player::new(session_id, display_name);
        if self.state.active_turn.is_none() {
            self.state.active_turn = Some(player.id.clone());
        }
        self.state.players.push(player.clone());

        Ok(player)
    }

    /// Apply a guess from the turn holder.
    ///
    /// The submitted value is normalised to two decimals and becomes the
    /// player's score in both outcomes.
    pub fn submit_guess(&mut self, session_id: &str, value: f64) -> GameResult<GuessOutcome> {
        let index = self
            .index_of(session_id)
            .ok_or_else(|| GameError::NotJoined {
                session_id: session_id.to_string(),
            })?;

        if self.state.active_turn.as_deref() != Some(session_id) {
            return Err(GameError::not_player_turn(
                self.state.active_turn.clone(),
                session_id,
            ));
        }

        if !value.is_finite() || !(TARGET_MIN..=TARGET_MAX).contains(&value) {
            return Err(GameError::InvalidGuess {
                value,
                min: TARGET_MIN,
                max: TARGET_MAX,
            });
        }

        let guess = round_cents(value);
        self.state.players[index].score = guess;

        if to_cents(guess) == to_cents(self.state.target_value) {
            self.state.players[index].wins += 1;
            self.end_round();
            Ok(GuessOutcome::Hit)
        } else {
            self.advance_turn_from(index);
            Ok(GuessOutcome::Miss)
        }
    }

    /// Remove the player bound to `session_id`, if any.
    ///
    /// When the turn holder leaves, the turn passes to the player that
    /// followed it in join order, wrapping to the front.
    pub fn disconnect(&mut self, session_id: &str) -> Option<Player> {
        let index = self.index_of(session_id)?;
        let removed = self.state.players.remove(index);
        self.state.ranking.retain(|p| p.id != removed.id);

        if self.state.players.is_empty() {
            self.state.active_turn = None;
        } else if self.state.active_turn.as_deref() == Some(removed.id.as_str()) {
            let next = index % self.state.players.len();
            self.state.active_turn = Some(self.state.players[next].id.clone());
        }

        Some(removed)
    }

    /// Every player with its distance from the current target, closest first.
    /// Equal distances keep join order.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let target = to_cents(self.state.target_value);
        let mut entries: Vec<LeaderboardEntry> = self
            .state
            .players
            .iter()
            .map(|player| LeaderboardEntry {
                player: player.clone(),
                difference: (target - to_cents(player.score)).abs() as f64 / 100.0,
            })
            .collect();

        entries.sort_by(|a, b| a.difference.total_cmp(&b.difference));
        entries
    }

    fn index_of(&self, session_id: &str) -> Option<usize> {
        self.state.players.iter().position(|p| p.id == session_id)
    }

    fn advance_turn_from(&mut self, index: usize) {
        let next = if index + 1 >= self.state.players.len() {
            0
        } else {
            index + 1
        };
        self.state.active_turn = Some(self.state.players[next].id.clone());
    }

    fn end_round(&mut self) {
        // The next round starts from the front of the table, not the winner.
        self.state.active_turn = self.state.players.first().map(|p| p.id.clone());
        self.recompute_ranking();
        self.state.target_value = roll_target(&mut self.rng);
        self.state.round += 1;
    }

    fn recompute_ranking(&mut self) {
        let mut ranking = self.state.players.clone();
        // Stable: equal wins keep join order.
        ranking.sort_by(|a, b| b.wins.cmp(&a.wins));
        self.state.ranking = ranking;
    }

    #[cfg(test)]
    pub(crate) fn set_target_value(&mut self, value: f64) {
        self.state.target_value = round_cents(value);
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::from_entropy()
    }
}

/// Uniform target in [1.00, 10.00) with two decimal places
fn roll_target(rng: &mut impl Rng) -> f64 {
    let cents = rng.gen_range(to_cents(TARGET_MIN)..to_cents(TARGET_MAX));
    cents as f64 / 100.0
}

fn to_cents(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

fn round_cents(value: f64) -> f64 {
    to_cents(value) as f64 / 100.0
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
