use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actions::SessionId;

/// Top-level error type for the whole server
#[derive(Error, Debug)]
pub enum PrecisionError {
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Rule violations raised by the game engine.
///
/// A command that fails with one of these leaves the game state untouched.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameError {
    #[error("Invalid display name: {reason}")]
    InvalidDisplayName { reason: String },

    #[error("Invalid guess {value}: must be a number between {min} and {max}")]
    InvalidGuess { value: f64, min: f64, max: f64 },

    #[error("Not player's turn: current={current_player:?}, attempted={attempted_player}")]
    NotPlayerTurn {
        current_player: Option<SessionId>,
        attempted_player: SessionId,
    },

    #[error("Session {session_id} has not joined the game")]
    NotJoined { session_id: SessionId },

    #[error("Session {session_id} already joined the game")]
    AlreadyJoined { session_id: SessionId },
}

/// Gateway/WebSocket errors
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum NetworkError {
    #[error("Message serialization failed: {details}")]
    SerializationFailed { details: String },

    #[error("Message deserialization failed: {details}")]
    DeserializationFailed { details: String },

    #[error("Connection closed unexpectedly: {details}")]
    ConnectionClosed { details: String },

    #[error("Game engine is no longer running")]
    EngineUnavailable,
}

/// Process-level failures
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PrecisionResult<T> = Result<T, PrecisionError>;
pub type GameResult<T> = Result<T, GameError>;
pub type NetworkResult<T> = Result<T, NetworkError>;

impl GameError {
    pub fn invalid_display_name(reason: impl Into<String>) -> Self {
        Self::InvalidDisplayName {
            reason: reason.into(),
        }
    }

    pub fn not_player_turn(current: Option<SessionId>, attempted: impl Into<SessionId>) -> Self {
        Self::NotPlayerTurn {
            current_player: current,
            attempted_player: attempted.into(),
        }
    }
}

impl NetworkError {
    pub fn serialization_failed(details: impl Into<String>) -> Self {
        Self::SerializationFailed {
            details: details.into(),
        }
    }

    pub fn deserialization_failed(details: impl Into<String>) -> Self {
        Self::DeserializationFailed {
            details: details.into(),
        }
    }
}
