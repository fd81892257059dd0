use serde::{Deserialize, Serialize};

use crate::game::{GameState, LeaderboardEntry, Player};

/// Opaque per-connection identifier assigned by the gateway
pub type SessionId = String;

/// Commands a client can send once connected.
///
/// Wire format: `{"type": "join", "display_name": "Ana"}`,
/// `{"type": "guess", "value": 6.23}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameCommand {
    Join { display_name: String },
    Guess { value: f64 },
}

/// Events produced by the engine after applying a command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Full snapshot; sent on connect/join, after every missed guess and
    /// when the turn holder leaves
    GameState { state: GameState },

    /// Full snapshot taken right after a winning guess
    RoundEnded { state: GameState },

    PlayerJoined { players: Vec<Player> },

    PlayerLeft { players: Vec<Player> },

    /// Players ordered by distance between their last guess and the target
    LeaderboardUpdate { players: Vec<LeaderboardEntry> },

    /// The joining session's own player record
    Welcome { player: Player },

    /// Sent only to the session whose command was rejected
    Error { message: String },
}

/// Who an outbound event is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    All,
    Session(SessionId),
}

impl Audience {
    pub fn includes(&self, session_id: &str) -> bool {
        match self {
            Audience::All => true,
            Audience::Session(id) => id == session_id,
        }
    }
}

/// An event together with its audience
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub audience: Audience,
    pub event: GameEvent,
}

impl Outbound {
    pub fn to_all(event: GameEvent) -> Self {
        Self {
            audience: Audience::All,
            event,
        }
    }

    pub fn to_session(session_id: impl Into<SessionId>, event: GameEvent) -> Self {
        Self {
            audience: Audience::Session(session_id.into()),
            event,
        }
    }
}
