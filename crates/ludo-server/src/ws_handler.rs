//! Per-connection WebSocket lifecycle.
//!
//! Unlike a lobby-gated game server, nothing here requires joining a room
//! before the read loop starts: `add_user`/`get_userdata`/`request_join`
//! are ordinary events like any other, dispatched one at a time off the
//! same envelope stream from the first frame to the last.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use ludo_core::protocol::Envelope;
use tokio::sync::{Mutex, mpsc};

use crate::dispatcher::{self, AppState};
use crate::game_logic;

/// Drives one upgraded socket until it closes, then tears down the
/// session registration and starts disconnect-grace timers for any room
/// the user was seated in.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, mut stream) = socket.split();
    let sink = Arc::new(Mutex::new(sink));

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let write_sink = sink.clone();
    let write_task = tokio::spawn(async move {
        while let Some(env) = rx.recv().await {
            let text = match env.to_text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping outbound envelope that failed to serialize");
                    continue;
                }
            };
            if write_sink
                .lock()
                .await
                .send(Message::Text(text.into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let mut current_user: Option<String> = None;

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(_) => break,
        };

        let env: Envelope = match serde_json::from_str(&text) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable inbound frame");
                continue;
            }
        };

        dispatcher::dispatch(&state, env, &tx, &mut current_user).await;
    }

    write_task.abort();

    if let Some(user_id) = current_user {
        for room in state.rooms.rooms_containing_user(&user_id).await {
            if game_logic::clear_tx_on_disconnect(&room, &user_id).await {
                game_logic::spawn_disconnect_grace(room, user_id.clone());
            }
        }
        state.sessions.remove_if_current(&user_id, &tx).await;
        tracing::info!(%user_id, "connection closed");
    }
}
