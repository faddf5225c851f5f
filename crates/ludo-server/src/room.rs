//! Room registry and matchmaking.
//!
//! One registry instance per server process. Matchmaking rooms are keyed
//! by a minted UUID; friend rooms are keyed by a 6-character code minted
//! from [`ludo_core::room_code`]. Both live in the same map — nothing
//! downstream needs to know which kind a room is, besides the
//! `is_friend_room` flag carried on [`Room`] itself.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ludo_core::error::LudoError;
use ludo_core::room_code::generate_room_code;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::Room;

pub type SharedRoom = Arc<Mutex<Room>>;

#[derive(Default)]
pub struct RoomManager {
    rooms: RwLock<HashMap<String, SharedRoom>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, room_id: &str) -> Option<SharedRoom> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn remove(&self, room_id: &str) {
        self.rooms.write().await.remove(room_id);
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Finds the first (insertion-order) WAITING matchmaking room with the
    /// same stake and capacity and spare seats, or `None` if a new one
    /// must be created.
    pub async fn find_available(&self, bet_amount: i64, max_players: u8) -> Option<SharedRoom> {
        let candidates: Vec<SharedRoom> = self.rooms.read().await.values().cloned().collect();
        for candidate in candidates {
            let matches = {
                let guard = candidate.lock().await;
                !guard.is_friend_room
                    && guard.status == crate::domain::RoomStatus::Waiting
                    && guard.bet_amount == bet_amount
                    && guard.max_players == max_players
                    && guard.player_count() < guard.max_players as usize
            };
            if matches {
                return Some(candidate);
            }
        }
        None
    }

    pub async fn create_matchmaking_room(
        &self,
        host_user_id: &str,
        bet_amount: i64,
        max_players: u8,
    ) -> SharedRoom {
        let room_id = Uuid::new_v4().to_string();
        let room = Arc::new(Mutex::new(Room::new(
            room_id.clone(),
            host_user_id.to_string(),
            bet_amount,
            max_players,
            false,
            Utc::now(),
        )));
        self.rooms.write().await.insert(room_id, room.clone());
        room
    }

    /// Registers a new friend room. Honors a client-requested code if it's
    /// well-formed and free; otherwise mints a fresh one, retrying on the
    /// astronomically unlikely collision.
    pub async fn create_friend_room(
        &self,
        host_user_id: &str,
        bet_amount: i64,
        max_players: u8,
        requested_code: Option<&str>,
    ) -> SharedRoom {
        let mut rooms = self.rooms.write().await;
        let code = match requested_code {
            Some(requested)
                if ludo_core::room_code::validate_room_code(requested).is_ok()
                    && !rooms.contains_key(requested) =>
            {
                requested.to_string()
            }
            _ => {
                let mut code = generate_room_code();
                while rooms.contains_key(&code) {
                    code = generate_room_code();
                }
                code
            }
        };
        let room = Arc::new(Mutex::new(Room::new(
            code.clone(),
            host_user_id.to_string(),
            bet_amount,
            max_players,
            true,
            Utc::now(),
        )));
        rooms.insert(code, room.clone());
        room
    }

    pub async fn find_friend_room(&self, code: &str) -> Result<SharedRoom, LudoError> {
        ludo_core::room_code::validate_room_code(code)?;
        self.rooms
            .read()
            .await
            .get(code)
            .cloned()
            .ok_or_else(|| LudoError::RoomNotFound(code.to_string()))
    }

    /// All rooms currently holding a seat for `user_id`, regardless of
    /// status. Used on transport disconnect, where the caller doesn't know
    /// in advance which room (if any) the departed connection was seated
    /// in.
    pub async fn rooms_containing_user(&self, user_id: &str) -> Vec<SharedRoom> {
        let candidates: Vec<SharedRoom> = self.rooms.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for candidate in candidates {
            if candidate.lock().await.find_player(user_id).is_some() {
                out.push(candidate);
            }
        }
        out
    }

    /// Finds the WAITING matchmaking room (if any) that still holds a seat
    /// for `user_id`, for `remove_from_matchmaking`. Friend rooms are never
    /// candidates — leaving one of those is an explicit `leave_room`.
    pub async fn find_waiting_seat(&self, user_id: &str) -> Option<(SharedRoom, u32)> {
        let candidates: Vec<SharedRoom> = self.rooms.read().await.values().cloned().collect();
        for candidate in candidates {
            let peer_id = {
                let guard = candidate.lock().await;
                if guard.is_friend_room || guard.status != crate::domain::RoomStatus::Waiting {
                    None
                } else {
                    guard.find_player(user_id).map(|p| p.peer_id)
                }
            };
            if let Some(peer_id) = peer_id {
                return Some((candidate, peer_id));
            }
        }
        None
    }
}
