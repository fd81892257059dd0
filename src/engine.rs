use std::collections::HashMap;

use log;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::actions::{GameCommand, GameEvent, Outbound, SessionId};
use crate::errors::{GameError, GameResult, NetworkError, NetworkResult};
use crate::game::{Game, GameState, GuessOutcome};

/// Where a connection is in its lifecycle. Guesses are only accepted from
/// joined sessions; a session joins at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    Joined,
}

/// Applies commands to the game and decides who hears about it.
///
/// This type is not shared; [`EngineHandle`] owns it inside a single task so
/// every command is applied in full before the next one is read.
pub struct GameEngine {
    game: Game,
    sessions: HashMap<SessionId, SessionPhase>,
}

impl GameEngine {
    pub fn new(game: Game) -> Self {
        Self {
            game,
            sessions: HashMap::new(),
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn snapshot(&self) -> GameState {
        self.game.snapshot()
    }

    pub fn session_phase(&self, session_id: &str) -> Option<SessionPhase> {
        self.sessions.get(session_id).copied()
    }

    /// Register a new connection and greet it with the current state
    pub fn connect(&mut self, session_id: &str) -> Vec<Outbound> {
        self.sessions
            .insert(session_id.to_string(), SessionPhase::Connected);

        vec![Outbound::to_session(
            session_id,
            GameEvent::GameState {
                state: self.game.snapshot(),
            },
        )]
    }

    /// Apply a command; a rejected command is answered to its sender only
    pub fn process(&mut self, session_id: &str, command: GameCommand) -> Vec<Outbound> {
        match self.handle_command(session_id, command) {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!("Rejected command from {}: {}", session_id, e);
                vec![Outbound::to_session(
                    session_id,
                    GameEvent::Error {
                        message: e.to_string(),
                    },
                )]
            }
        }
    }

    pub fn handle_command(
        &mut self,
        session_id: &str,
        command: GameCommand,
    ) -> GameResult<Vec<Outbound>> {
        match command {
            GameCommand::Join { display_name } => self.join(session_id, &display_name),
            GameCommand::Guess { value } => self.guess(session_id, value),
        }
    }

    /// Drop the session and its player. Unknown sessions are ignored.
    ///
    /// If the leaver held the turn, everyone also gets a fresh snapshot so
    /// the new holder knows it may guess.
    pub fn disconnect(&mut self, session_id: &str) -> Vec<Outbound> {
        self.sessions.remove(session_id);

        let turn_before = self.game.state().active_turn.clone();
        let Some(player) = self.game.disconnect(session_id) else {
            return Vec::new();
        };
        log::info!(
            "Player \"{}\" ({}) left the game",
            player.display_name,
            player.id
        );

        let mut messages = vec![Outbound::to_all(GameEvent::PlayerLeft {
            players: self.game.players().to_vec(),
        })];
        if self.game.state().active_turn != turn_before {
            messages.push(Outbound::to_all(GameEvent::GameState {
                state: self.game.snapshot(),
            }));
        }
        messages
    }

    fn join(&mut self, session_id: &str, display_name: &str) -> GameResult<Vec<Outbound>> {
        if self.session_phase(session_id) == Some(SessionPhase::Joined) {
            return Err(GameError::AlreadyJoined {
                session_id: session_id.to_string(),
            });
        }

        let player = self.game.join(session_id, display_name)?;
        self.sessions
            .insert(session_id.to_string(), SessionPhase::Joined);

        log::info!(
            "Player \"{}\" ({}) joined the game",
            player.display_name,
            player.id
        );

        Ok(vec![
            Outbound::to_session(session_id, GameEvent::Welcome { player }),
            Outbound::to_session(
                session_id,
                GameEvent::GameState {
                    state: self.game.snapshot(),
                },
            ),
            Outbound::to_all(GameEvent::PlayerJoined {
                players: self.game.players().to_vec(),
            }),
        ])
    }

    fn guess(&mut self, session_id: &str, value: f64) -> GameResult<Vec<Outbound>> {
        if self.session_phase(session_id) != Some(SessionPhase::Joined) {
            return Err(GameError::NotJoined {
                session_id: session_id.to_string(),
            });
        }

        let outcome = self.game.submit_guess(session_id, value)?;
        let state = self.game.snapshot();

        let turn_event = match outcome {
            GuessOutcome::Hit => {
                log::info!(
                    "Session {} hit the target; round {} begins",
                    session_id,
                    state.round
                );
                GameEvent::RoundEnded { state }
            }
            GuessOutcome::Miss => {
                log::debug!("Session {} missed with {}", session_id, value);
                GameEvent::GameState { state }
            }
        };

        Ok(vec![
            Outbound::to_all(turn_event),
            Outbound::to_all(GameEvent::LeaderboardUpdate {
                players: self.game.leaderboard(),
            }),
        ])
    }
}

/// Requests queued for the engine task
#[derive(Debug)]
pub enum EngineRequest {
    Connect {
        session_id: SessionId,
    },
    Command {
        session_id: SessionId,
        command: GameCommand,
    },
    Disconnect {
        session_id: SessionId,
    },
    Snapshot {
        reply: oneshot::Sender<GameState>,
    },
}

/// Cloneable handle to the engine task.
///
/// Requests go through a bounded queue; everything the engine emits is
/// published on one broadcast channel in the order it was produced.
#[derive(Clone)]
pub struct EngineHandle {
    requests: mpsc::Sender<EngineRequest>,
    outbound: broadcast::Sender<Outbound>,
}

impl EngineHandle {
    /// Move `engine` into its own task and return a handle to it
    pub fn spawn(engine: GameEngine, queue_capacity: usize, broadcast_capacity: usize) -> Self {
        let (requests, receiver) = mpsc::channel(queue_capacity);
        let (outbound, _) = broadcast::channel(broadcast_capacity);

        tokio::spawn(run_engine(engine, receiver, outbound.clone()));

        Self { requests, outbound }
    }

    /// Subscribe before calling [`connect`](Self::connect) so the greeting
    /// is not missed.
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound.subscribe()
    }

    pub async fn connect(&self, session_id: &str) -> NetworkResult<()> {
        self.send(EngineRequest::Connect {
            session_id: session_id.to_string(),
        })
        .await
    }

    pub async fn command(&self, session_id: &str, command: GameCommand) -> NetworkResult<()> {
        self.send(EngineRequest::Command {
            session_id: session_id.to_string(),
            command,
        })
        .await
    }

    pub async fn disconnect(&self, session_id: &str) -> NetworkResult<()> {
        self.send(EngineRequest::Disconnect {
            session_id: session_id.to_string(),
        })
        .await
    }

    pub async fn snapshot(&self) -> NetworkResult<GameState> {
        let (reply, response) = oneshot::channel();
        self.send(EngineRequest::Snapshot { reply }).await?;
        response.await.map_err(|_| NetworkError::EngineUnavailable)
    }

    async fn send(&self, request: EngineRequest) -> NetworkResult<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| NetworkError::EngineUnavailable)
    }
}

async fn run_engine(
    mut engine: GameEngine,
    mut requests: mpsc::Receiver<EngineRequest>,
    outbound: broadcast::Sender<Outbound>,
) {
    log::info!(
        "Game engine started (round {}, {} players)",
        engine.game().state().round,
        engine.game().players().len()
    );

    while let Some(request) = requests.recv().await {
        let messages = match request {
            EngineRequest::Connect { session_id } => engine.connect(&session_id),
            EngineRequest::Command {
                session_id,
                command,
            } => engine.process(&session_id, command),
            EngineRequest::Disconnect { session_id } => engine.disconnect(&session_id),
            EngineRequest::Snapshot { reply } => {
                // Receiver may have given up; nothing to do then.
                let _ = reply.send(engine.snapshot());
                continue;
            }
        };

        for message in messages {
            // No subscribers just means nobody is listening right now.
            let _ = outbound.send(message);
        }
    }

    log::info!("Game engine stopped: all handles dropped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Audience;

    fn engine() -> GameEngine {
        GameEngine::new(Game::with_seed(11))
    }

    fn join(name: &str) -> GameCommand {
        GameCommand::Join {
            display_name: name.to_string(),
        }
    }

    fn guess(value: f64) -> GameCommand {
        GameCommand::Guess { value }
    }

    fn joined(names: &[&str]) -> GameEngine {
        let mut engine = engine();
        for name in names {
            engine.connect(name);
            engine.handle_command(name, join(name)).unwrap();
        }
        engine
    }

    #[test]
    fn test_connect_greets_session_with_state() {
        let mut engine = engine();

        let messages = engine.connect("s1");

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].audience, Audience::Session("s1".to_string()));
        assert!(matches!(messages[0].event, GameEvent::GameState { .. }));
        assert_eq!(engine.session_phase("s1"), Some(SessionPhase::Connected));
    }

    #[test]
    fn test_join_sends_welcome_state_and_player_list() {
        let mut engine = engine();
        engine.connect("s1");

        let messages = engine.handle_command("s1", join("Ana")).unwrap();

        assert_eq!(messages.len(), 3);
        match &messages[0] {
            Outbound {
                audience: Audience::Session(id),
                event: GameEvent::Welcome { player },
            } => {
                assert_eq!(id, "s1");
                assert_eq!(player.display_name, "Ana");
            }
            other => panic!("unexpected message {other:?}"),
        }
        match &messages[1] {
            Outbound {
                audience: Audience::Session(id),
                event: GameEvent::GameState { state },
            } => {
                assert_eq!(id, "s1");
                assert_eq!(state.active_turn.as_deref(), Some("s1"));
            }
            other => panic!("unexpected message {other:?}"),
        }
        match &messages[2] {
            Outbound {
                audience: Audience::All,
                event: GameEvent::PlayerJoined { players },
            } => assert_eq!(players.len(), 1),
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(engine.session_phase("s1"), Some(SessionPhase::Joined));
    }

    #[test]
    fn test_empty_name_is_rejected_without_broadcast() {
        let mut engine = engine();
        engine.connect("s1");

        let messages = engine.process("s1", join(""));

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].audience, Audience::Session("s1".to_string()));
        assert!(matches!(messages[0].event, GameEvent::Error { .. }));
        assert!(engine.game().players().is_empty());
        assert_eq!(engine.session_phase("s1"), Some(SessionPhase::Connected));
    }

    #[test]
    fn test_second_join_is_rejected() {
        let mut engine = joined(&["a"]);

        let err = engine.handle_command("a", join("again")).unwrap_err();

        assert!(matches!(err, GameError::AlreadyJoined { .. }));
        assert_eq!(engine.game().players().len(), 1);
    }

    #[test]
    fn test_guess_before_join_is_rejected() {
        let mut engine = engine();
        engine.connect("s1");

        let err = engine.handle_command("s1", guess(5.0)).unwrap_err();

        assert!(matches!(err, GameError::NotJoined { .. }));
    }

    #[test]
    fn test_out_of_turn_guess_only_answers_sender() {
        let mut engine = joined(&["a", "b"]);
        let before = engine.snapshot();

        let messages = engine.process("b", guess(5.0));

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].audience, Audience::Session("b".to_string()));
        assert!(matches!(messages[0].event, GameEvent::Error { .. }));
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn test_miss_broadcasts_state_then_leaderboard() {
        let mut engine = joined(&["a", "b"]);
        engine.game.set_target_value(6.23);

        let messages = engine.handle_command("a", guess(5.0)).unwrap();

        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.audience == Audience::All));
        match &messages[0].event {
            GameEvent::GameState { state } => {
                assert_eq!(state.active_turn.as_deref(), Some("b"));
                assert_eq!(state.players[0].score, 5.0);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &messages[1].event {
            GameEvent::LeaderboardUpdate { players } => {
                assert_eq!(players[0].player.id, "a");
                assert_eq!(players[0].difference, 1.23);
                assert_eq!(players[1].difference, 6.23);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_hit_broadcasts_round_end() {
        let mut engine = joined(&["a", "b", "c"]);
        engine.game.set_target_value(6.23);
        engine.handle_command("a", guess(5.0)).unwrap();

        let messages = engine.handle_command("b", guess(6.23)).unwrap();

        match &messages[0].event {
            GameEvent::RoundEnded { state } => {
                assert_eq!(state.active_turn.as_deref(), Some("a"));
                assert_eq!(state.round, 2);
                let ranking: Vec<&str> = state.ranking.iter().map(|p| p.id.as_str()).collect();
                assert_eq!(ranking, ["b", "a", "c"]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            messages[1].event,
            GameEvent::LeaderboardUpdate { .. }
        ));
    }

    #[test]
    fn test_disconnect_broadcasts_remaining_players() {
        let mut engine = joined(&["a", "b"]);
        engine.game.set_target_value(6.23);
        engine.handle_command("a", guess(5.0)).unwrap();

        let messages = engine.disconnect("b");

        match &messages[..] {
            [Outbound {
                audience: Audience::All,
                event: GameEvent::PlayerLeft { players },
            }, Outbound {
                audience: Audience::All,
                event: GameEvent::GameState { state },
            }] => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, "a");
                assert_eq!(state.active_turn.as_deref(), Some("a"));
            }
            other => panic!("unexpected messages {other:?}"),
        }
        assert_eq!(engine.snapshot().active_turn.as_deref(), Some("a"));
        assert_eq!(engine.session_phase("b"), None);
    }

    #[test]
    fn test_holder_disconnect_broadcasts_new_turn() {
        let mut engine = joined(&["a", "b", "c"]);

        let messages = engine.disconnect("a");

        match &messages[..] {
            [Outbound {
                audience: Audience::All,
                event: GameEvent::PlayerLeft { players },
            }, Outbound {
                audience: Audience::All,
                event: GameEvent::GameState { state },
            }] => {
                let ids: Vec<&str> = players.iter().map(|p| p.id.as_str()).collect();
                assert_eq!(ids, ["b", "c"]);
                assert_eq!(state.active_turn.as_deref(), Some("b"));
            }
            other => panic!("unexpected messages {other:?}"),
        }
    }

    #[test]
    fn test_last_player_leaving_broadcasts_empty_turn() {
        let mut engine = joined(&["a"]);

        let messages = engine.disconnect("a");

        assert_eq!(messages.len(), 2);
        match &messages[1].event {
            GameEvent::GameState { state } => {
                assert!(state.players.is_empty());
                assert_eq!(state.active_turn, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_non_holder_disconnect_only_sends_player_list() {
        let mut engine = joined(&["a", "b", "c"]);

        let messages = engine.disconnect("c");

        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0].event, GameEvent::PlayerLeft { .. }));
        assert_eq!(engine.snapshot().active_turn.as_deref(), Some("a"));
    }

    #[test]
    fn test_disconnect_before_join_is_silent() {
        let mut engine = joined(&["a"]);
        engine.connect("lurker");

        assert!(engine.disconnect("lurker").is_empty());
        assert!(engine.disconnect("never-seen").is_empty());
        assert_eq!(engine.game().players().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_routes_messages_in_order() {
        let handle = EngineHandle::spawn(engine(), 16, 64);
        let mut rx = handle.subscribe();

        handle.connect("s1").await.unwrap();
        handle.command("s1", join("Ana")).await.unwrap();

        let greeting = rx.recv().await.unwrap();
        assert!(matches!(greeting.event, GameEvent::GameState { .. }));
        let welcome = rx.recv().await.unwrap();
        assert!(matches!(welcome.event, GameEvent::Welcome { .. }));
        let state = rx.recv().await.unwrap();
        assert!(matches!(state.event, GameEvent::GameState { .. }));
        let joined = rx.recv().await.unwrap();
        assert_eq!(joined.audience, Audience::All);
        assert!(matches!(joined.event, GameEvent::PlayerJoined { .. }));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.active_turn.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_concurrent_guesses_apply_serially() {
        let handle = EngineHandle::spawn(engine(), 256, 1024);
        for id in ["a", "b", "c"] {
            handle.connect(id).await.unwrap();
            handle.command(id, join(id)).await.unwrap();
        }
        let target = handle.snapshot().await.unwrap().target_value;
        let miss = if target == 5.0 { 6.0 } else { 5.0 };

        // Everybody fires at once; only the holder's guess may land.
        let mut tasks = Vec::new();
        for id in ["a", "b", "c"] {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.command(id, guess(miss)).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let state = handle.snapshot().await.unwrap();
        let guessed: Vec<&str> = state
            .players
            .iter()
            .filter(|p| p.score == miss)
            .map(|p| p.id.as_str())
            .collect();

        // Only the holder's guess lands, so the players that guessed are
        // always a prefix of the turn order.
        let order = ["a", "b", "c"];
        assert!(!guessed.is_empty());
        assert_eq!(guessed[..], order[..guessed.len()]);
        let holder = state.active_turn.as_deref().unwrap();
        let expected_holder = order[guessed.len() % order.len()];
        assert_eq!(holder, expected_holder);
    }

    #[tokio::test]
    async fn test_snapshot_fails_once_engine_is_gone() {
        let (requests, receiver) = mpsc::channel(1);
        drop(receiver);
        let (outbound, _) = broadcast::channel(1);
        let handle = EngineHandle { requests, outbound };

        let err = handle.snapshot().await.unwrap_err();

        assert!(matches!(err, NetworkError::EngineUnavailable));
    }
}
