//! Wire protocol: the named-event envelope plus the typed payload for each
//! inbound and outbound event named in the coordinator's public interface.
//!
//! Every frame on the wire is a small JSON envelope:
//!
//! ```json
//! {"event": "dice_send", "data": "{\"room_id\":\"...\",\"peer_id\":0,\"dice_face\":4}"}
//! ```
//!
//! `data` is itself a JSON-encoded string, not a nested object — the
//! envelope is parsed first, then `data` is parsed again against the
//! payload type the named event expects. This mirrors the source
//! transport's habit of stuffing a JSON string into a single event field.
//! The one exception is `remove_from_matchmaking`, whose `data` is the raw
//! `user_id`, not JSON-wrapped; callers that need it should read the
//! envelope's `data` field directly instead of parsing it.

use serde::{Deserialize, Serialize};

use crate::domain::PlayerStatus;
use crate::error::LudoError;

/// The outer frame every inbound and outbound message is wrapped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub data: String,
}

impl Envelope {
    pub fn new(event: &str, payload: &impl Serialize) -> Result<Self, LudoError> {
        Ok(Self {
            event: event.to_string(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Build an envelope whose `data` is already a finished string (used for
    /// `auth_token` and the raw `remove_from_matchmaking` echo).
    pub fn raw(event: &str, data: impl Into<String>) -> Self {
        Self {
            event: event.to_string(),
            data: data.into(),
        }
    }

    pub fn parse<T: for<'de> Deserialize<'de>>(&self) -> Result<T, LudoError> {
        serde_json::from_str(&self.data).map_err(LudoError::from)
    }

    pub fn to_text(&self) -> Result<String, LudoError> {
        serde_json::to_string(self).map_err(LudoError::from)
    }
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUserPayload {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub fcm_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetUserdataPayload {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestJoinPayload {
    pub user_id: String,
    pub user_name: String,
    pub room_coin_value: i64,
    pub room_players_size: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendCreateRoomPayload {
    pub user_id: String,
    pub user_name: String,
    pub room_coin_value: i64,
    pub room_players_size: u8,
    #[serde(default)]
    pub room_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendJoinRoomPayload {
    pub user_id: String,
    pub user_name: String,
    pub room_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiceSendPayload {
    pub room_id: String,
    pub peer_id: u32,
    pub dice_face: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenSendPayload {
    pub room_id: String,
    pub peer_id: u32,
    pub token_id: u32,
    pub token_value: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResetPayload {
    pub room_id: String,
    pub peer_id: u32,
    pub token_id: u32,
    pub token_value: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeTurnPayload {
    pub room_id: String,
    pub peer_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinGamePayload {
    pub room_id: String,
    pub peer_id: u32,
    pub player_rank: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaveRoomPayload {
    pub room_id: String,
    pub peer_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserChatPayload {
    pub room_id: String,
    pub peer_id: u32,
    pub chat_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserEmojiPayload {
    pub room_id: String,
    pub peer_id: u32,
    pub emoji_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserGiftPayload {
    pub room_id: String,
    pub peer_id: u32,
    pub gift_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPreviousRoomPayload {
    pub room_id: String,
    pub user_id: String,
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct UserDataPayload {
    pub user_id: String,
    pub user_name: String,
    pub user_coin: i64,
    pub numof_win: u32,
    pub numof_lose: u32,
    pub user_level: u32,
    pub total_games: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPublicInfo {
    pub peer_id: u32,
    pub user_id: String,
    pub user_name: String,
    pub status: PlayerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameStartPayload {
    pub room_id: String,
    pub room_coin: i64,
    pub userdata: Vec<PlayerPublicInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiceReceivedPayload {
    pub peer_id: u32,
    pub dice_face: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenReceivedPayload {
    pub peer_id: u32,
    pub token_id: u32,
    pub token_value: i32,
    pub dice_face: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserTimeoutCounterPayload {
    pub peer_id: u32,
    pub numoftimeout: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerJoinedPayload {
    pub peer_id: u32,
    pub user_name: String,
    pub player_count: usize,
    pub max_players: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendRoomCodePayload {
    pub room_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameDataSnapshot {
    pub last_dice: u8,
    pub moves: Vec<MoveSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveSnapshot {
    pub peer_id: u32,
    pub token_id: u32,
    pub token_value: i32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousRoomDataPayload {
    pub room_id: String,
    pub peer_id: u32,
    pub players: Vec<PlayerPublicInfo>,
    pub game_data: GameDataSnapshot,
    pub current_turn: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomNotFoundPayload {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsufficientCoinsPayload {
    pub required: i64,
    pub current: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendErrorResponsePayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveRoomOutboundPayload {
    pub peer_id: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserChatOutboundPayload {
    pub peer_id: u32,
    pub chat_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserEmojiOutboundPayload {
    pub peer_id: u32,
    pub emoji_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserGiftOutboundPayload {
    pub peer_id: u32,
    pub gift_id: String,
}

/// One ranked settlement result, as emitted in `game_over`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResult {
    pub user_id: String,
    pub winning_coin: i64,
    pub player_rank: u32,
    pub player_status: PlayerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOverPayload {
    pub results: Vec<SettlementResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_typed_payload() {
        let payload = DiceSendPayload {
            room_id: "R1".to_string(),
            peer_id: 2,
            dice_face: 5,
        };
        let env = Envelope::new("dice_send", &payload).unwrap();
        assert_eq!(env.event, "dice_send");

        let parsed: DiceSendPayload = env.parse().unwrap();
        assert_eq!(parsed.room_id, "R1");
        assert_eq!(parsed.peer_id, 2);
        assert_eq!(parsed.dice_face, 5);
    }

    #[test]
    fn raw_envelope_carries_unwrapped_string() {
        let env = Envelope::raw("remove_from_matchmaking", "user-42");
        assert_eq!(env.data, "user-42");
    }

    #[test]
    fn bare_peer_id_is_json_encoded_in_data() {
        let env = Envelope::new("turn_changed", &3u32).unwrap();
        assert_eq!(env.data, "3");
    }
}
