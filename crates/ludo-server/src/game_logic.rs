//! The per-room state machine transition table.
//!
//! Every function here either holds the room's own lock for its whole
//! mutation (so a fired timer can never interleave with an inbound event)
//! or re-acquires it after an `.await` boundary, never across an outbound
//! send — `PlayerTx::send` is non-blocking, so broadcasting while the
//! guard is held is fine, but settlement's store I/O happens after the
//! triggering broadcast has already gone out.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ludo_core::domain::PlayerStatus;
use ludo_core::protocol::{
    DiceReceivedPayload, Envelope, GameStartPayload, LeaveRoomOutboundPayload,
    PlayerJoinedPayload, PreviousRoomDataPayload, TokenReceivedPayload, UserTimeoutCounterPayload,
};
use tokio::time::sleep;

use crate::domain::{
    DISCONNECT_GRACE_SECS, FINISHED_ROOM_TTL_SECS, MAX_TIMEOUTS, MoveRecord, Player, PlayerTx,
    RoomStatus, TURN_TIMEOUT_SECS, WIN_SETTLE_DELAY_SECS,
};
use crate::room::{RoomManager, SharedRoom};
use crate::settlement::settle;
use crate::user_store::SharedUserStore;

pub enum SeatOutcome {
    Seated { peer_id: u32 },
    Full,
}

/// Seats a player into a WAITING room, transitioning to PLAYING and
/// arming the turn timer once the roster fills.
pub async fn seat_player(
    room: &SharedRoom,
    rooms: Arc<RoomManager>,
    store: SharedUserStore,
    user_id: &str,
    user_name: &str,
    tx: PlayerTx,
) -> SeatOutcome {
    let (peer_id, room_id, start_payload) = {
        let mut guard = room.lock().await;
        if guard.status != RoomStatus::Waiting
            || guard.player_count() >= guard.max_players as usize
        {
            return SeatOutcome::Full;
        }

        let peer_id = guard.player_count() as u32;
        guard.players.push(Player {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            peer_id,
            status: PlayerStatus::Playing,
            numoftimeout: 0,
            joined_at: chrono::Utc::now(),
            tx: Some(tx),
        });

        let joined = PlayerJoinedPayload {
            peer_id,
            user_name: user_name.to_string(),
            player_count: guard.player_count(),
            max_players: guard.max_players,
        };
        if let Ok(env) = Envelope::new("player_joined", &joined) {
            guard.broadcast_except(&env, peer_id);
        }

        let start_payload = if guard.player_count() == guard.max_players as usize {
            guard.status = RoomStatus::Playing;
            guard.current_turn = 0;
            let userdata = guard.players.iter().map(Player::public_info).collect();
            Some(GameStartPayload {
                room_id: guard.room_id.clone(),
                room_coin: guard.bet_amount,
                userdata,
            })
        } else {
            None
        };

        (peer_id, guard.room_id.clone(), start_payload)
    };

    if let Some(payload) = start_payload {
        if let Ok(env) = Envelope::new("game_start", &payload) {
            room.lock().await.broadcast(&env);
        }
        arm_turn_timer(rooms, store, room_id).await;
    }

    SeatOutcome::Seated { peer_id }
}

/// Rebinds a reconnecting player's outbound channel and returns the
/// snapshot to send back as `previous_room_data`.
pub async fn rebind_for_reconnect(
    room: &SharedRoom,
    user_id: &str,
    tx: PlayerTx,
) -> Option<PreviousRoomDataPayload> {
    let mut guard = room.lock().await;
    let peer_id = {
        let player = guard.find_player_mut(user_id)?;
        player.tx = Some(tx);
        player.peer_id
    };
    let players = guard.players.iter().map(Player::public_info).collect();
    let game_data = guard.game_data.snapshot();
    let current_turn = guard.current_player().map(|p| p.peer_id).unwrap_or(0);

    Some(PreviousRoomDataPayload {
        room_id: guard.room_id.clone(),
        peer_id,
        players,
        game_data,
        current_turn,
    })
}

/// Relays a dice roll to the rest of the room and rearms the turn timer.
pub async fn handle_dice_send(
    room: &SharedRoom,
    rooms: Arc<RoomManager>,
    store: SharedUserStore,
    room_id: String,
    peer_id: u32,
    dice_face: u8,
) {
    {
        let mut guard = room.lock().await;
        if guard.status != RoomStatus::Playing {
            return;
        }
        guard.game_data.last_dice = dice_face;
        let env = Envelope::new("dice_recieved", &DiceReceivedPayload { peer_id, dice_face })
            .expect("DiceReceivedPayload always serializes");
        guard.broadcast_except(&env, peer_id);
    }
    arm_turn_timer(rooms, store, room_id).await;
}

/// Records a token move and relays it to the rest of the room, rearming
/// the turn timer.
pub async fn handle_token_send(
    room: &SharedRoom,
    rooms: Arc<RoomManager>,
    store: SharedUserStore,
    room_id: String,
    peer_id: u32,
    token_id: u32,
    token_value: i32,
) {
    {
        let mut guard = room.lock().await;
        if guard.status != RoomStatus::Playing {
            return;
        }
        let dice_face = guard.game_data.last_dice;
        guard.game_data.moves.push(MoveRecord {
            peer_id,
            token_id,
            token_value,
            timestamp: chrono::Utc::now(),
        });
        let env = Envelope::new(
            "token_recieved",
            &TokenReceivedPayload {
                peer_id,
                token_id,
                token_value,
                dice_face,
            },
        )
        .expect("TokenReceivedPayload always serializes");
        guard.broadcast_except(&env, peer_id);
    }
    arm_turn_timer(rooms, store, room_id).await;
}

/// Relays a token kill. Unlike `token_send` this never rearms the timer
/// and never echoes to the sender; `dice_face` is always 0 since a reset
/// is not tied to a roll.
pub async fn handle_token_reset(room: &SharedRoom, peer_id: u32, token_id: u32, token_value: i32) {
    let guard = room.lock().await;
    if guard.status != RoomStatus::Playing {
        return;
    }
    let env = Envelope::new(
        "token_recieved",
        &TokenReceivedPayload {
            peer_id,
            token_id,
            token_value,
            dice_face: 0,
        },
    )
    .expect("TokenReceivedPayload always serializes");
    guard.broadcast_except(&env, peer_id);
}

/// Advances the turn cursor and rearms the timer. If no `PLAYING` player
/// remains to advance to, the room is finished and settled immediately.
pub async fn handle_change_turn(
    room: &SharedRoom,
    rooms: Arc<RoomManager>,
    store: SharedUserStore,
    room_id: String,
) {
    let should_settle = {
        let mut guard = room.lock().await;
        if guard.status != RoomStatus::Playing {
            return;
        }
        match guard.advance_turn() {
            Some(next_peer) => {
                let env = Envelope::new("turn_changed", &next_peer)
                    .expect("peer id always serializes");
                guard.broadcast(&env);
                false
            }
            None => {
                guard.status = RoomStatus::Finished;
                true
            }
        }
    };

    if should_settle {
        finish_and_settle(room, &store, rooms, room_id).await;
    } else {
        arm_turn_timer(rooms, store, room_id).await;
    }
}

/// A player declares victory. Finishes and settles the room once at most
/// one `PLAYING` player remains.
pub async fn handle_win_game(
    room: &SharedRoom,
    rooms: Arc<RoomManager>,
    store: SharedUserStore,
    room_id: String,
    peer_id: u32,
) {
    let should_settle = {
        let mut guard = room.lock().await;
        if guard.status != RoomStatus::Playing {
            return;
        }
        match guard.player_by_peer_mut(peer_id) {
            Some(player) => player.status = PlayerStatus::Win,
            None => return,
        }

        let env = Envelope::new("win_game", &peer_id).expect("peer id always serializes");
        guard.broadcast_except(&env, peer_id);

        if guard.playing_count() <= 1 {
            guard.status = RoomStatus::Finished;
            true
        } else {
            if guard.current_player().map(|p| p.peer_id) == Some(peer_id) {
                guard.advance_turn();
            }
            false
        }
    };

    if should_settle {
        finish_and_settle(room, &store, rooms, room_id).await;
    }
}

/// A player leaves. Pre-game this may empty the room (destroyed by the
/// caller); mid-game it may leave a sole survivor, who auto-wins.
pub async fn handle_leave_room(
    room: &SharedRoom,
    rooms: Arc<RoomManager>,
    store: SharedUserStore,
    room_id: String,
    peer_id: u32,
) {
    let (should_settle, should_destroy) = {
        let mut guard = room.lock().await;
        match guard.player_by_peer_mut(peer_id) {
            Some(player) => {
                player.status = PlayerStatus::Left;
                player.tx = None;
            }
            None => return,
        }

        let env = Envelope::new("leave_room", &LeaveRoomOutboundPayload { peer_id })
            .expect("LeaveRoomOutboundPayload always serializes");
        guard.broadcast_except(&env, peer_id);

        match guard.status {
            RoomStatus::Waiting => {
                let empty = !guard.players.iter().any(|p| p.status == PlayerStatus::Playing);
                (false, empty)
            }
            RoomStatus::Playing => {
                if guard.playing_count() == 1 {
                    if let Some(winner_peer) = guard
                        .players
                        .iter()
                        .find(|p| p.status.is_active())
                        .map(|p| p.peer_id)
                    {
                        if let Some(winner) = guard.player_by_peer_mut(winner_peer) {
                            winner.status = PlayerStatus::Win;
                        }
                        let env =
                            Envelope::new("win_game", &winner_peer).expect("peer id always serializes");
                        guard.broadcast(&env);
                    }
                    guard.status = RoomStatus::Finished;
                    (true, false)
                } else {
                    if guard.current_player().map(|p| p.peer_id) == Some(peer_id) {
                        guard.advance_turn();
                    }
                    (false, false)
                }
            }
            RoomStatus::Finished => (false, false),
        }
    };

    if should_settle {
        finish_and_settle(room, &store, rooms.clone(), room_id.clone()).await;
    }
    if should_destroy {
        rooms.remove(&room_id).await;
    }
}

/// Marks a player TIMEOUT after the disconnect-grace window expires
/// without a reconnect. Never touches the turn timer or the timeout
/// counter — only the turn-timer escalation path can terminate a game.
pub async fn apply_disconnect_timeout(room: &SharedRoom, user_id: &str) {
    let mut guard = room.lock().await;
    if guard.status != RoomStatus::Playing {
        return;
    }
    let Some(player) = guard.find_player_mut(user_id) else {
        return;
    };
    if player.tx.is_some() {
        return;
    }
    player.status = PlayerStatus::Timeout;
    let peer_id = player.peer_id;
    let env = Envelope::new("user_timeout", &peer_id).expect("peer id always serializes");
    guard.broadcast(&env);
}

/// Drops a player's transport handle on connection loss, returning whether
/// a disconnect-grace timer should be started (only meaningful mid-game —
/// a WAITING-room departure is an explicit `leave_room`/`remove_from_matchmaking`
/// from the client, not a silent drop).
pub async fn clear_tx_on_disconnect(room: &SharedRoom, user_id: &str) -> bool {
    let mut guard = room.lock().await;
    let Some(player) = guard.find_player_mut(user_id) else {
        return false;
    };
    player.tx = None;
    guard.status == RoomStatus::Playing
}

/// Spawns the 30-second disconnect grace timer for `user_id`.
pub fn spawn_disconnect_grace(room: SharedRoom, user_id: String) {
    tokio::spawn(async move {
        sleep(Duration::from_secs(DISCONNECT_GRACE_SECS)).await;
        apply_disconnect_timeout(&room, &user_id).await;
    });
}

/// Bumps the room's turn-generation counter and spawns a fresh one-shot
/// timer task that fires the escalation table unless superseded.
pub fn arm_turn_timer(
    rooms: Arc<RoomManager>,
    store: SharedUserStore,
    room_id: String,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        let Some(room) = rooms.get(&room_id).await else {
            return;
        };
        let generation = {
            let guard = room.lock().await;
            guard.turn_generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        tokio::spawn(async move {
            sleep(Duration::from_secs(TURN_TIMEOUT_SECS)).await;
            on_turn_timer_fire(rooms, store, room_id, generation).await;
        });
    })
}

enum TimerOutcome {
    Rearm,
    SettleNow,
    SettleAfterDelay,
}

async fn on_turn_timer_fire(
    rooms: Arc<RoomManager>,
    store: SharedUserStore,
    room_id: String,
    generation: u64,
) {
    let Some(room) = rooms.get(&room_id).await else {
        return;
    };

    let outcome = {
        let mut guard = room.lock().await;
        if guard.status != RoomStatus::Playing {
            return;
        }
        if guard.turn_generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let Some(current_peer) = guard.current_player().map(|p| p.peer_id) else {
            return;
        };
        let numoftimeout = {
            let player = guard
                .player_by_peer_mut(current_peer)
                .expect("current player always present in roster");
            player.numoftimeout += 1;
            player.numoftimeout
        };

        if numoftimeout < MAX_TIMEOUTS {
            let env = Envelope::new(
                "user_timeout_counter",
                &UserTimeoutCounterPayload {
                    peer_id: current_peer,
                    numoftimeout,
                },
            )
            .expect("UserTimeoutCounterPayload always serializes");
            guard.broadcast(&env);
            guard.advance_turn();
            TimerOutcome::Rearm
        } else {
            guard
                .player_by_peer_mut(current_peer)
                .expect("current player always present in roster")
                .status = PlayerStatus::Timeout;
            let env = Envelope::new("user_timeout", &current_peer)
                .expect("peer id always serializes");
            guard.broadcast(&env);

            match guard.playing_count() {
                0 => {
                    guard.status = RoomStatus::Finished;
                    TimerOutcome::SettleNow
                }
                1 => {
                    if let Some(winner_peer) = guard
                        .players
                        .iter()
                        .find(|p| p.status.is_active())
                        .map(|p| p.peer_id)
                    {
                        if let Some(winner) = guard.player_by_peer_mut(winner_peer) {
                            winner.status = PlayerStatus::Win;
                        }
                        let env = Envelope::new("win_game", &winner_peer)
                            .expect("peer id always serializes");
                        guard.broadcast(&env);
                    }
                    guard.status = RoomStatus::Finished;
                    TimerOutcome::SettleAfterDelay
                }
                _ => {
                    guard.advance_turn();
                    TimerOutcome::Rearm
                }
            }
        }
    };

    match outcome {
        TimerOutcome::Rearm => Box::pin(arm_turn_timer(rooms, store, room_id)).await,
        TimerOutcome::SettleNow => finish_and_settle(&room, &store, rooms, room_id).await,
        TimerOutcome::SettleAfterDelay => {
            tokio::spawn(async move {
                sleep(Duration::from_secs(WIN_SETTLE_DELAY_SECS)).await;
                finish_and_settle(&room, &store, rooms, room_id).await;
            });
        }
    }
}

/// Runs settlement and broadcasts `game_over`, tolerating a room that was
/// already settled by a racing path. Schedules the room's removal from the
/// registry once the post-game window elapses.
async fn finish_and_settle(
    room: &SharedRoom,
    store: &SharedUserStore,
    rooms: Arc<RoomManager>,
    room_id: String,
) {
    {
        let mut guard = room.lock().await;
        if guard.settled {
            return;
        }
        let payload = settle(&mut guard, store.as_ref()).await;
        if let Ok(env) = Envelope::new("game_over", &payload) {
            guard.broadcast(&env);
        }
    }

    tokio::spawn(async move {
        sleep(Duration::from_secs(FINISHED_ROOM_TTL_SECS)).await;
        rooms.remove(&room_id).await;
    });
}
