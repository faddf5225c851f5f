//! Axum entry point: a single WebSocket route plus two status endpoints.
//!
//! # Routes
//!
//! | Method | Path      | Description                              |
//! |--------|-----------|-------------------------------------------|
//! | `GET`  | `/ws`     | WebSocket upgrade for game connections     |
//! | `GET`  | `/`       | Liveness string                            |
//! | `GET`  | `/status` | Room/user/connection counts (JSON)         |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use ludo_server::config::Config;
use ludo_server::dispatcher::AppState;
use ludo_server::error::ServerError;
use ludo_server::room::RoomManager;
use ludo_server::session::SessionRegistry;
use ludo_server::user_store::{DualUserStore, RedisUserStore};
use ludo_server::{status, ws_handler};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    tracing::info!(host = %config.host, port = config.port, "loaded configuration");

    let durable = match RedisUserStore::connect(&config.redis.connection_url()).await {
        Ok(store) => {
            tracing::info!("connected to redis");
            Some(store)
        }
        Err(e) => {
            tracing::warn!(error = %e, "redis unreachable at startup, running in-memory only");
            None
        }
    };

    let state = Arc::new(AppState {
        rooms: Arc::new(RoomManager::new()),
        sessions: Arc::new(SessionRegistry::new()),
        store: Arc::new(DualUserStore::new(durable)),
    });

    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/", get(status::liveness))
        .route("/status", get(status::status))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::new(
        config.host.parse().unwrap_or_else(|_| [0, 0, 0, 0].into()),
        config.port,
    );
    tracing::info!("ludo-server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// `GET /ws` — upgrade to WebSocket and hand off to [`ws_handler::handle_socket`].
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_handler::handle_socket(socket, state))
}

/// Resolves on `SIGINT` (ctrl-c) or `SIGTERM`, whichever comes first, so
/// the HTTP server can drain in-flight connections before exiting.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
