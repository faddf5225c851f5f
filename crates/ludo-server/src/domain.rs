//! In-memory room/player domain types.
//!
//! Transport-agnostic: this module knows nothing about WebSockets or
//! Axum. [`crate::ws_handler`] wires it to a concrete transport; the state
//! transitions themselves live in [`crate::game_logic`].

use std::sync::atomic::AtomicU64;

use chrono::{DateTime, Utc};
use ludo_core::domain::PlayerStatus;
use ludo_core::protocol::Envelope;
use tokio::sync::mpsc;

/// Per-player outbound channel. The WebSocket write loop drains this and
/// forwards frames as text.
pub type PlayerTx = mpsc::UnboundedSender<Envelope>;
pub type PlayerRx = mpsc::UnboundedReceiver<Envelope>;
/// Alias kept for readability at call sites that build outbound frames.
pub type OutboundMessage = Envelope;

/// Fixed per-turn timer duration in seconds.
pub const TURN_TIMEOUT_SECS: u64 = 30;
/// Reconnection grace window after a transport drop.
pub const DISCONNECT_GRACE_SECS: u64 = 30;
/// Delay between the last survivor being marked WIN and settlement running.
pub const WIN_SETTLE_DELAY_SECS: u64 = 2;
/// How long a FINISHED room lingers in the registry before cleanup.
pub const FINISHED_ROOM_TTL_SECS: u64 = 10;
/// Cumulative timeouts before a player is removed from play.
pub const MAX_TIMEOUTS: u8 = 3;

/// A seated player. `peer_id` is the 0-based roster position assigned at
/// join and is immutable for the life of the room, even once the player
/// leaves or times out — the roster is never compacted.
#[derive(Debug, Clone)]
pub struct Player {
    pub user_id: String,
    pub user_name: String,
    pub peer_id: u32,
    pub status: PlayerStatus,
    pub numoftimeout: u8,
    pub joined_at: DateTime<Utc>,
    /// `None` while the player is in the disconnect-grace window.
    pub tx: Option<PlayerTx>,
}

impl Player {
    pub fn public_info(&self) -> ludo_core::protocol::PlayerPublicInfo {
        ludo_core::protocol::PlayerPublicInfo {
            peer_id: self.peer_id,
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

/// One relayed token move, recorded for reconnection snapshots.
#[derive(Debug, Clone)]
pub struct MoveRecord {
    pub peer_id: u32,
    pub token_id: u32,
    pub token_value: i32,
    pub timestamp: DateTime<Utc>,
}

/// Relayed dice/move state. The server never validates Ludo semantics —
/// it just remembers the last roll and the move log for reconnection.
#[derive(Debug, Clone, Default)]
pub struct GameData {
    pub last_dice: u8,
    pub moves: Vec<MoveRecord>,
}

impl GameData {
    pub fn snapshot(&self) -> ludo_core::protocol::GameDataSnapshot {
        ludo_core::protocol::GameDataSnapshot {
            last_dice: self.last_dice,
            moves: self
                .moves
                .iter()
                .map(|m| ludo_core::protocol::MoveSnapshot {
                    peer_id: m.peer_id,
                    token_id: m.token_id,
                    token_value: m.token_value,
                    timestamp: m.timestamp.timestamp(),
                })
                .collect(),
        }
    }
}

/// A single room: roster, turn cursor, and the timer-generation counter
/// that invalidates stale timer tasks.
pub struct Room {
    pub room_id: String,
    pub host_user_id: String,
    pub bet_amount: i64,
    pub max_players: u8,
    pub status: RoomStatus,
    pub players: Vec<Player>,
    pub current_turn: usize,
    pub game_data: GameData,
    pub created_at: DateTime<Utc>,
    /// Bumped on every timer rearm; a fired timer task compares its
    /// captured generation against this value and no-ops on mismatch.
    pub turn_generation: AtomicU64,
    /// Flips to `true` the first time settlement runs so a race between
    /// the timeout escalation path and an explicit `win_game`/`leave_room`
    /// can never double-credit.
    pub settled: bool,
    /// Friend rooms are keyed by code instead of minted UUIDs, but share
    /// the same registry keyspace; this just records which kind it is.
    pub is_friend_room: bool,
}

impl Room {
    pub fn new(
        room_id: String,
        host_user_id: String,
        bet_amount: i64,
        max_players: u8,
        is_friend_room: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            room_id,
            host_user_id,
            bet_amount,
            max_players,
            status: RoomStatus::Waiting,
            players: Vec::new(),
            current_turn: 0,
            game_data: GameData::default(),
            created_at: now,
            turn_generation: AtomicU64::new(0),
            settled: false,
            is_friend_room,
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn find_player(&self, user_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    pub fn find_player_mut(&mut self, user_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn player_by_peer(&self, peer_id: u32) -> Option<&Player> {
        self.players.iter().find(|p| p.peer_id == peer_id)
    }

    pub fn player_by_peer_mut(&mut self, peer_id: u32) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.peer_id == peer_id)
    }

    pub fn playing_count(&self) -> usize {
        self.players.iter().filter(|p| p.status.is_active()).count()
    }

    /// Send a frame to one player by peer id. Silently drops if the
    /// player is mid-disconnect (no `tx`) or the channel is closed.
    pub fn send_to_peer(&self, peer_id: u32, msg: &OutboundMessage) {
        if let Some(player) = self.player_by_peer(peer_id)
            && let Some(tx) = &player.tx
        {
            let _ = tx.send(msg.clone());
        }
    }

    /// Broadcast to every seated player (including ones mid-disconnect,
    /// who simply drop the message).
    pub fn broadcast(&self, msg: &OutboundMessage) {
        for player in &self.players {
            if let Some(tx) = &player.tx {
                let _ = tx.send(msg.clone());
            }
        }
    }

    /// Broadcast to everyone except `exclude_peer_id`.
    pub fn broadcast_except(&self, msg: &OutboundMessage, exclude_peer_id: u32) {
        for player in &self.players {
            if player.peer_id != exclude_peer_id
                && let Some(tx) = &player.tx
            {
                let _ = tx.send(msg.clone());
            }
        }
    }

    /// Scan forward from `(current_turn + 1) mod N`, at most N positions,
    /// for the first player with `status = PLAYING`. Returns `None` if no
    /// active player remains.
    pub fn advance_turn(&mut self) -> Option<u32> {
        let n = self.players.len();
        if n == 0 {
            return None;
        }
        let start = self.current_turn;
        for step in 1..=n {
            let idx = (start + step) % n;
            if self.players[idx].status.is_active() {
                self.current_turn = idx;
                return Some(self.players[idx].peer_id);
            }
        }
        None
    }

    pub fn current_player(&self) -> Option<&Player> {
        self.players.get(self.current_turn)
    }
}
