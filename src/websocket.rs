use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{sink::SinkExt, stream::StreamExt};
use log;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use crate::actions::{GameCommand, GameEvent, SessionId};
use crate::engine::EngineHandle;
use crate::errors::{NetworkError, NetworkResult};

/// WebSocket gateway between sockets and the game engine.
/// No game rules live here.
#[derive(Clone)]
pub struct WebSocketService {
    engine: EngineHandle,
}

impl WebSocketService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Drive one connection until either side goes away
    pub async fn handle_connection(&self, socket: WebSocket) {
        let session_id: SessionId = format!("conn_{}", uuid::Uuid::new_v4());
        log::info!("🔌 WebSocket connected: {}", session_id);

        // Subscribe before registering so the greeting snapshot is not lost.
        let mut updates = self.engine.subscribe();
        if let Err(e) = self.engine.connect(&session_id).await {
            log::error!("❌ Could not register {}: {}", session_id, e);
            return;
        }

        let (mut sender, mut receiver) = socket.split();

        // Replies that never go through the engine (malformed frames).
        let (local_tx, mut local_rx) = mpsc::unbounded_channel::<GameEvent>();

        let session_for_updates = session_id.clone();
        let mut update_task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    update = updates.recv() => match update {
                        Ok(outbound) => {
                            if !outbound.audience.includes(&session_for_updates) {
                                continue;
                            }
                            outbound.event
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!(
                                "Connection {} lagged behind, skipped {} messages",
                                session_for_updates,
                                skipped
                            );
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    local = local_rx.recv() => match local {
                        Some(event) => event,
                        None => break,
                    },
                };

                if let Err(e) = send_event(&mut sender, &event).await {
                    log::error!(
                        "Failed to send message to connection {}: {}",
                        session_for_updates,
                        e
                    );
                    break;
                }
            }
        });

        let engine = self.engine.clone();
        let session_for_messages = session_id.clone();
        let mut message_task = tokio::spawn(async move {
            while let Some(Ok(message)) = receiver.next().await {
                match message {
                    Message::Text(text) => {
                        log::debug!("🔍 {} sent: {}", session_for_messages, text.as_str());
                        match parse_command(text.as_str()) {
                            Ok(command) => {
                                if let Err(e) = engine.command(&session_for_messages, command).await
                                {
                                    log::error!("❌ {}", e);
                                    break;
                                }
                            }
                            Err(e) => {
                                log::warn!(
                                    "Dropping frame from {}: {}",
                                    session_for_messages,
                                    e
                                );
                                let _ = local_tx.send(GameEvent::Error {
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                    Message::Close(_) => {
                        log::info!("WebSocket connection {} closed", session_for_messages);
                        break;
                    }
                    _ => {
                        // Ignore other message types
                    }
                }
            }
        });

        // Wait for either task to complete (client disconnect or error)
        tokio::select! {
            _ = &mut update_task => {
                message_task.abort();
            }
            _ = &mut message_task => {
                update_task.abort();
            }
        }

        if let Err(e) = self.engine.disconnect(&session_id).await {
            log::error!("❌ Could not unregister {}: {}", session_id, e);
        }
        log::info!("WebSocket connection {} terminated", session_id);
    }
}

/// Parse a client frame into an engine command
pub fn parse_command(text: &str) -> NetworkResult<GameCommand> {
    serde_json::from_str(text).map_err(|e| NetworkError::deserialization_failed(e.to_string()))
}

/// Render an event as the JSON text frame sent to clients
pub fn encode_event(event: &GameEvent) -> NetworkResult<String> {
    serde_json::to_string(event).map_err(|e| NetworkError::serialization_failed(e.to_string()))
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GameEvent,
) -> NetworkResult<()> {
    let json = encode_event(event)?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| NetworkError::ConnectionClosed {
            details: e.to_string(),
        })
}
