//! Inbound event handlers.
//!
//! Parses each envelope's typed payload, mutates the relevant room or user
//! record, and emits the matching outbound events. Malformed payloads are
//! logged and dropped; a handler never panics the connection task.

use std::sync::Arc;

use chrono::Utc;
use ludo_core::domain::User;
use ludo_core::protocol::{
    AddUserPayload, ChangeTurnPayload, DiceSendPayload, Envelope, ErrorPayload,
    FriendCreateRoomPayload, FriendErrorResponsePayload, FriendJoinRoomPayload,
    FriendRoomCodePayload, GetPreviousRoomPayload, GetUserdataPayload, InsufficientCoinsPayload,
    LeaveRoomPayload, RequestJoinPayload, RoomNotFoundPayload, TokenResetPayload,
    TokenSendPayload, UserChatPayload, UserChatOutboundPayload, UserDataPayload,
    UserEmojiOutboundPayload, UserEmojiPayload, UserGiftOutboundPayload, UserGiftPayload,
    WinGamePayload,
};
use serde::Serialize;
use tracing::warn;

use crate::domain::PlayerTx;
use crate::game_logic::{self, SeatOutcome};
use crate::room::RoomManager;
use crate::session::SessionRegistry;
use crate::user_store::{SharedUserStore, UserStore};

/// Everything a handler needs: the room registry, session registry, and
/// user store, each already `Arc`-wrapped for cheap cloning into spawned
/// timer tasks.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomManager>,
    pub sessions: Arc<SessionRegistry>,
    pub store: SharedUserStore,
}

/// Parses `env` and routes it to the matching handler. Unknown events and
/// payloads that fail to parse are logged and otherwise ignored.
pub async fn dispatch(
    state: &AppState,
    env: Envelope,
    conn_tx: &PlayerTx,
    current_user: &mut Option<String>,
) {
    match env.event.as_str() {
        "add_user" => match env.parse() {
            Ok(p) => handle_add_user(state, p, conn_tx, current_user).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "get_userdata" => match env.parse() {
            Ok(p) => handle_get_userdata(state, p, conn_tx).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "request_join" => match env.parse() {
            Ok(p) => handle_request_join(state, p, conn_tx).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "friend_create_room" => match env.parse() {
            Ok(p) => handle_friend_create_room(state, p, conn_tx).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "friend_join_room" => match env.parse() {
            Ok(p) => handle_friend_join_room(state, p, conn_tx).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "dice_send" => match env.parse() {
            Ok(p) => handle_dice_send(state, p).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "token_send" => match env.parse() {
            Ok(p) => handle_token_send(state, p).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "token_reset" => match env.parse() {
            Ok(p) => handle_token_reset(state, p).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "change_turn" => match env.parse() {
            Ok(p) => handle_change_turn(state, p).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "win_game" => match env.parse() {
            Ok(p) => handle_win_game(state, p).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "leave_room" => match env.parse() {
            Ok(p) => handle_leave_room(state, p).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "user_chat" => match env.parse() {
            Ok(p) => handle_user_chat(state, p).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "user_emoji_id" => match env.parse() {
            Ok(p) => handle_user_emoji(state, p).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "user_send_gift" => match env.parse() {
            Ok(p) => handle_user_gift(state, p).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "get_previous_room" => match env.parse() {
            Ok(p) => handle_get_previous_room(state, p, conn_tx).await,
            Err(e) => reject(conn_tx, &env.event, e),
        },
        "remove_from_matchmaking" => {
            // Raw user_id, not JSON-wrapped — read `data` directly.
            handle_remove_from_matchmaking(state, env.data.clone()).await;
        }
        other => warn!(event = other, "ignoring unknown inbound event"),
    }
}

fn send(conn_tx: &PlayerTx, event: &str, payload: &impl Serialize) {
    match Envelope::new(event, payload) {
        Ok(env) => {
            let _ = conn_tx.send(env);
        }
        Err(e) => warn!(event, error = %e, "failed to serialize outbound payload"),
    }
}

/// Logs a malformed inbound payload and tells the originating connection
/// its message was rejected, rather than dropping it silently.
fn reject(conn_tx: &PlayerTx, event: &str, e: impl std::fmt::Display) {
    warn!(event, error = %e, "dropping malformed payload");
    send(
        conn_tx,
        "error",
        &ErrorPayload {
            message: format!("malformed payload for event \"{event}\""),
        },
    );
}

async fn load_or_create_user(store: &SharedUserStore, user_id: &str, user_name: &str) -> User {
    match store.get(user_id).await {
        Some(user) => user,
        None => {
            let user = User::new(user_id, user_name, Utc::now());
            store.put(user.clone()).await;
            user
        }
    }
}

/// Deducts `bet_amount` from `user_id`'s balance, creating the user on
/// first sight. Returns the shortfall as `Err((required, current))` if the
/// balance is insufficient — no deduction happens in that case.
async fn deduct_bet(
    store: &SharedUserStore,
    user_id: &str,
    user_name: &str,
    bet_amount: i64,
) -> Result<(), (i64, i64)> {
    let mut user = load_or_create_user(store, user_id, user_name).await;
    if user.coins < bet_amount {
        return Err((bet_amount, user.coins));
    }
    user.coins -= bet_amount;
    store.put(user).await;
    Ok(())
}

async fn refund_bet(store: &SharedUserStore, user_id: &str, bet_amount: i64) {
    if let Some(mut user) = store.get(user_id).await {
        user.coins += bet_amount;
        store.put(user).await;
    }
}

async fn handle_add_user(
    state: &AppState,
    payload: AddUserPayload,
    conn_tx: &PlayerTx,
    current_user: &mut Option<String>,
) {
    load_or_create_user(&state.store, &payload.user_id, &payload.user_name).await;
    state.sessions.register(&payload.user_id, conn_tx.clone()).await;
    *current_user = Some(payload.user_id.clone());

    let token = format!("token_{}_{}", payload.user_id, Utc::now().timestamp());
    let _ = conn_tx.send(Envelope::raw("auth_token", token));
}

async fn handle_get_userdata(state: &AppState, payload: GetUserdataPayload, conn_tx: &PlayerTx) {
    let user = load_or_create_user(&state.store, &payload.user_id, &payload.user_name).await;
    send(
        conn_tx,
        "user_data",
        &UserDataPayload {
            user_id: user.user_id,
            user_name: user.user_name,
            user_coin: user.coins,
            numof_win: user.win_count,
            numof_lose: user.lost_count,
            user_level: user.level,
            total_games: user.total_games_played,
        },
    );
}

async fn handle_request_join(state: &AppState, payload: RequestJoinPayload, conn_tx: &PlayerTx) {
    if let Err((required, current)) = deduct_bet(
        &state.store,
        &payload.user_id,
        &payload.user_name,
        payload.room_coin_value,
    )
    .await
    {
        send(
            conn_tx,
            "insufficient_coins",
            &InsufficientCoinsPayload { required, current },
        );
        return;
    }

    let room = match state
        .rooms
        .find_available(payload.room_coin_value, payload.room_players_size)
        .await
    {
        Some(room) => room,
        None => {
            state
                .rooms
                .create_matchmaking_room(
                    &payload.user_id,
                    payload.room_coin_value,
                    payload.room_players_size,
                )
                .await
        }
    };

    let outcome = game_logic::seat_player(
        &room,
        state.rooms.clone(),
        state.store.clone(),
        &payload.user_id,
        &payload.user_name,
        conn_tx.clone(),
    )
    .await;

    // Lost the race for the last seat; a fresh room always has room.
    if matches!(outcome, SeatOutcome::Full) {
        let fresh = state
            .rooms
            .create_matchmaking_room(
                &payload.user_id,
                payload.room_coin_value,
                payload.room_players_size,
            )
            .await;
        game_logic::seat_player(
            &fresh,
            state.rooms.clone(),
            state.store.clone(),
            &payload.user_id,
            &payload.user_name,
            conn_tx.clone(),
        )
        .await;
    }
}

async fn handle_friend_create_room(
    state: &AppState,
    payload: FriendCreateRoomPayload,
    conn_tx: &PlayerTx,
) {
    if let Err((required, current)) = deduct_bet(
        &state.store,
        &payload.user_id,
        &payload.user_name,
        payload.room_coin_value,
    )
    .await
    {
        send(
            conn_tx,
            "insufficient_coins",
            &InsufficientCoinsPayload { required, current },
        );
        return;
    }

    let room = state
        .rooms
        .create_friend_room(
            &payload.user_id,
            payload.room_coin_value,
            payload.room_players_size,
            payload.room_code.as_deref(),
        )
        .await;
    let room_code = room.lock().await.room_id.clone();

    game_logic::seat_player(
        &room,
        state.rooms.clone(),
        state.store.clone(),
        &payload.user_id,
        &payload.user_name,
        conn_tx.clone(),
    )
    .await;

    send(conn_tx, "friend_room_code", &FriendRoomCodePayload { room_code });
}

async fn handle_friend_join_room(
    state: &AppState,
    payload: FriendJoinRoomPayload,
    conn_tx: &PlayerTx,
) {
    let room = match state.rooms.find_friend_room(&payload.room_code).await {
        Ok(room) => room,
        Err(_) => {
            send(
                conn_tx,
                "room_not_found",
                &RoomNotFoundPayload {
                    room_id: payload.room_code.clone(),
                },
            );
            return;
        }
    };

    let bet_amount = room.lock().await.bet_amount;
    if let Err((required, current)) =
        deduct_bet(&state.store, &payload.user_id, &payload.user_name, bet_amount).await
    {
        send(
            conn_tx,
            "insufficient_coins",
            &InsufficientCoinsPayload { required, current },
        );
        return;
    }

    let outcome = game_logic::seat_player(
        &room,
        state.rooms.clone(),
        state.store.clone(),
        &payload.user_id,
        &payload.user_name,
        conn_tx.clone(),
    )
    .await;

    if matches!(outcome, SeatOutcome::Full) {
        refund_bet(&state.store, &payload.user_id, bet_amount).await;
        send(
            conn_tx,
            "friend_error_response",
            &FriendErrorResponsePayload {
                message: "Room is full".to_string(),
            },
        );
    }
}

async fn handle_dice_send(state: &AppState, payload: DiceSendPayload) {
    let Some(room) = state.rooms.get(&payload.room_id).await else {
        return;
    };
    game_logic::handle_dice_send(
        &room,
        state.rooms.clone(),
        state.store.clone(),
        payload.room_id,
        payload.peer_id,
        payload.dice_face,
    )
    .await;
}

async fn handle_token_send(state: &AppState, payload: TokenSendPayload) {
    let Some(room) = state.rooms.get(&payload.room_id).await else {
        return;
    };
    game_logic::handle_token_send(
        &room,
        state.rooms.clone(),
        state.store.clone(),
        payload.room_id,
        payload.peer_id,
        payload.token_id,
        payload.token_value,
    )
    .await;
}

async fn handle_token_reset(state: &AppState, payload: TokenResetPayload) {
    let Some(room) = state.rooms.get(&payload.room_id).await else {
        return;
    };
    game_logic::handle_token_reset(&room, payload.peer_id, payload.token_id, payload.token_value)
        .await;
}

async fn handle_change_turn(state: &AppState, payload: ChangeTurnPayload) {
    let Some(room) = state.rooms.get(&payload.room_id).await else {
        return;
    };
    game_logic::handle_change_turn(&room, state.rooms.clone(), state.store.clone(), payload.room_id)
        .await;
}

/// The client's `player_rank` is advisory only — settlement computes the
/// authoritative rank from roster order, never trusting the caller.
async fn handle_win_game(state: &AppState, payload: WinGamePayload) {
    let Some(room) = state.rooms.get(&payload.room_id).await else {
        return;
    };
    game_logic::handle_win_game(
        &room,
        state.rooms.clone(),
        state.store.clone(),
        payload.room_id,
        payload.peer_id,
    )
    .await;
}

async fn handle_leave_room(state: &AppState, payload: LeaveRoomPayload) {
    let Some(room) = state.rooms.get(&payload.room_id).await else {
        return;
    };
    game_logic::handle_leave_room(
        &room,
        state.rooms.clone(),
        state.store.clone(),
        payload.room_id,
        payload.peer_id,
    )
    .await;
}

async fn handle_user_chat(state: &AppState, payload: UserChatPayload) {
    let Some(room) = state.rooms.get(&payload.room_id).await else {
        return;
    };
    let guard = room.lock().await;
    if let Ok(env) = Envelope::new(
        "user_chat",
        &UserChatOutboundPayload {
            peer_id: payload.peer_id,
            chat_text: payload.chat_text,
        },
    ) {
        guard.broadcast_except(&env, payload.peer_id);
    }
}

async fn handle_user_emoji(state: &AppState, payload: UserEmojiPayload) {
    let Some(room) = state.rooms.get(&payload.room_id).await else {
        return;
    };
    let guard = room.lock().await;
    if let Ok(env) = Envelope::new(
        "user_emoji_id",
        &UserEmojiOutboundPayload {
            peer_id: payload.peer_id,
            emoji_id: payload.emoji_id,
        },
    ) {
        guard.broadcast_except(&env, payload.peer_id);
    }
}

async fn handle_user_gift(state: &AppState, payload: UserGiftPayload) {
    let Some(room) = state.rooms.get(&payload.room_id).await else {
        return;
    };
    let guard = room.lock().await;
    if let Ok(env) = Envelope::new(
        "user_send_gift",
        &UserGiftOutboundPayload {
            peer_id: payload.peer_id,
            gift_id: payload.gift_id,
        },
    ) {
        guard.broadcast_except(&env, payload.peer_id);
    }
}

async fn handle_get_previous_room(
    state: &AppState,
    payload: GetPreviousRoomPayload,
    conn_tx: &PlayerTx,
) {
    let Some(room) = state.rooms.get(&payload.room_id).await else {
        send(
            conn_tx,
            "room_not_found",
            &RoomNotFoundPayload {
                room_id: payload.room_id,
            },
        );
        return;
    };

    match game_logic::rebind_for_reconnect(&room, &payload.user_id, conn_tx.clone()).await {
        Some(snapshot) => send(conn_tx, "previous_room_data", &snapshot),
        None => send(
            conn_tx,
            "room_not_found",
            &RoomNotFoundPayload {
                room_id: payload.room_id,
            },
        ),
    }
}

async fn handle_remove_from_matchmaking(state: &AppState, user_id: String) {
    if let Some((room, peer_id)) = state.rooms.find_waiting_seat(&user_id).await {
        let room_id = room.lock().await.room_id.clone();
        game_logic::handle_leave_room(
            &room,
            state.rooms.clone(),
            state.store.clone(),
            room_id,
            peer_id,
        )
        .await;
    }
}
