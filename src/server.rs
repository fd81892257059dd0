use axum::http::Method;
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use log;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::engine::{EngineHandle, GameEngine};
use crate::errors::{PrecisionResult, ServerError};
use crate::game::{Game, GameState};
use crate::websocket::WebSocketService;

async fn hello_world() -> &'static str {
    "Hello from the Precision game server!"
}

async fn get_state(
    State(service): State<WebSocketService>,
) -> Result<Json<GameState>, StatusCode> {
    match service.engine().snapshot().await {
        Ok(state) => Ok(Json(state)),
        Err(e) => {
            log::error!("Failed to read game state: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(service): State<WebSocketService>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move { service.handle_connection(socket).await })
}

/// Routes plus a permissive CORS layer; browsers connect from anywhere.
pub fn router(service: WebSocketService) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/", get(hello_world))
        .route("/state", get(get_state))
        .route("/ws", get(ws_handler))
        .with_state(service)
        .layer(cors)
}

/// Start the engine task for `config`
pub fn start_engine(config: &ServerConfig) -> EngineHandle {
    let game = match config.seed {
        Some(seed) => Game::with_seed(seed),
        None => Game::from_entropy(),
    };

    EngineHandle::spawn(
        GameEngine::new(game),
        config.queue_capacity,
        config.broadcast_capacity,
    )
}

/// Bind and serve until the listener fails
pub async fn run(config: ServerConfig) -> PrecisionResult<()> {
    let address = config.address();
    let engine = start_engine(&config);
    let app = router(WebSocketService::new(engine));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;

    log::info!("Precision server listening on {}", address);

    axum::serve(listener, app)
        .await
        .map_err(ServerError::Io)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_engine_uses_seed() {
        let config = ServerConfig {
            seed: Some(99),
            ..ServerConfig::default()
        };

        let first = start_engine(&config).snapshot().await.unwrap();
        let second = start_engine(&config).snapshot().await.unwrap();

        assert_eq!(first.target_value, second.target_value);
        assert!(first.players.is_empty());
        assert_eq!(first.active_turn, None);
    }

    #[tokio::test]
    async fn test_state_endpoint_returns_snapshot() {
        let service = WebSocketService::new(start_engine(&ServerConfig::default()));

        let Json(state) = get_state(State(service)).await.unwrap();

        assert_eq!(state.round, 1);
        assert!(state.players.is_empty());
    }

    #[tokio::test]
    async fn test_run_reports_bind_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..ServerConfig::default()
        };

        let err = run(config).await.unwrap_err();

        assert!(matches!(
            err,
            crate::errors::PrecisionError::Server(ServerError::Bind { .. })
        ));
    }
}
