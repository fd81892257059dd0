// Precision Server Library - Core Module Organization
//
// One shared guessing game: clients join over a WebSocket, take turns
// guessing a hidden two-decimal number and receive every state change.

// Core game data structures and rules
pub mod actions;
pub mod errors;
pub mod game;

// Serialized access to the game
pub mod engine;

// Server implementation
pub mod config;
pub mod server;
pub mod websocket;

// Re-export common types for convenient access
pub use crate::actions::{Audience, GameCommand, GameEvent, Outbound, SessionId};
pub use crate::config::ServerConfig;
pub use crate::engine::{EngineHandle, GameEngine, SessionPhase};
pub use crate::errors::{GameError, NetworkError, PrecisionError, PrecisionResult, ServerError};
pub use crate::game::{Game, GameState, GuessOutcome, LeaderboardEntry, Player};
pub use crate::websocket::WebSocketService;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
