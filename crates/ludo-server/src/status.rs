//! Liveness and aggregate status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::dispatcher::AppState;
use crate::user_store::UserStore;

/// `GET /` — plain liveness string for load-balancer health checks.
pub async fn liveness() -> &'static str {
    "ludo-server is running"
}

#[derive(Debug, Serialize)]
pub struct StatusPayload {
    pub status: &'static str,
    pub rooms: usize,
    pub users: usize,
    pub connections: usize,
}

/// `GET /status` — a coarse operational snapshot: live room and
/// connection counts plus the known user count (durable-backed when
/// Redis is reachable, in-memory otherwise).
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusPayload> {
    let rooms = state.rooms.room_count().await;
    let connections = state.sessions.connection_count().await;
    let users = state.store.list_all().await.len();

    Json(StatusPayload {
        status: "ok",
        rooms,
        users,
        connections,
    })
}
