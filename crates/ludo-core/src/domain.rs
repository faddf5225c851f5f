//! Persisted domain types shared between the user store and the protocol
//! layer: the [`User`] profile and the 0-based [`PlayerStatus`] codes that
//! travel on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Starting balance credited the first time a `user_id` is seen.
pub const STARTING_COINS: i64 = 1000;

/// A persisted user profile: identity, coin balance, and win/loss record.
///
/// `level` is derived (`1 + win_count / 10`) and recomputed whenever
/// `win_count` changes rather than stored independently, so it can never
/// drift out of sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: String,
    pub user_name: String,
    pub coins: i64,
    pub win_count: u32,
    pub lost_count: u32,
    pub total_games_played: u32,
    pub level: u32,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl User {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            coins: STARTING_COINS,
            win_count: 0,
            lost_count: 0,
            total_games_played: 0,
            level: 1,
            created_at: now,
            last_update: now,
        }
    }

    /// `1 + floor(win_count / 10)`, recomputed after every win.
    pub fn recompute_level(&mut self) {
        self.level = 1 + self.win_count / 10;
    }
}

/// Status of a seated player, encoded on the wire as the integer values
/// given in the protocol (`PLAYING=0, WIN=1, LEFT=2, TIMEOUT=3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayerStatus {
    Playing = 0,
    Win = 1,
    Left = 2,
    Timeout = 3,
}

impl PlayerStatus {
    pub fn is_active(self) -> bool {
        matches!(self, PlayerStatus::Playing)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Serialize for PlayerStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for PlayerStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match u8::deserialize(deserializer)? {
            0 => Ok(PlayerStatus::Playing),
            1 => Ok(PlayerStatus::Win),
            2 => Ok(PlayerStatus::Left),
            3 => Ok(PlayerStatus::Timeout),
            other => Err(serde::de::Error::custom(format!(
                "invalid player status code {other}"
            ))),
        }
    }
}
