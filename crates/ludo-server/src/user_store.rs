//! The dual-backend user store.
//!
//! Two interchangeable backends satisfy the same [`UserStore`] trait: a
//! durable Redis-backed store and an in-memory fallback. [`DualUserStore`]
//! is what the rest of the server actually holds — it always writes the
//! in-memory copy first (so a Redis outage can never lose a just-accepted
//! write), then write-throughs to Redis when [`UserStore::connected`]
//! reports true. A failed durable write is logged and otherwise
//! invisible to the caller; it never fails a user-visible request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use ludo_core::domain::User;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;

use crate::error::ServerError;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Option<User>;
    async fn put(&self, user: User);
    async fn delete(&self, user_id: &str);
    async fn list_all(&self) -> Vec<User>;
    async fn leaderboard_upsert(&self, user_id: &str, win_count: u32);
    /// Descending by win count.
    async fn leaderboard_top(&self, n: usize) -> Vec<(String, u32)>;
    /// 1-based; 0 if the user has no leaderboard entry.
    async fn leaderboard_rank(&self, user_id: &str) -> u32;
    async fn session_put(&self, session_id: &str, data: &str, ttl_secs: u64);
    async fn session_get(&self, session_id: &str) -> Option<String>;
    async fn session_delete(&self, session_id: &str);
    /// Liveness probe for the backend this implementation wraps.
    async fn connected(&self) -> bool;
}

// ---------------------------------------------------------------------------
// In-memory fallback
// ---------------------------------------------------------------------------

struct SessionEntry {
    data: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, User>>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get(&self, user_id: &str) -> Option<User> {
        self.users.read().await.get(user_id).cloned()
    }

    async fn put(&self, mut user: User) {
        user.last_update = Utc::now();
        self.users.write().await.insert(user.user_id.clone(), user);
    }

    async fn delete(&self, user_id: &str) {
        self.users.write().await.remove(user_id);
    }

    async fn list_all(&self) -> Vec<User> {
        self.users.read().await.values().cloned().collect()
    }

    async fn leaderboard_upsert(&self, user_id: &str, win_count: u32) {
        if let Some(user) = self.users.write().await.get_mut(user_id) {
            user.win_count = win_count;
        }
    }

    async fn leaderboard_top(&self, n: usize) -> Vec<(String, u32)> {
        let users = self.users.read().await;
        let mut ranked: Vec<(String, u32)> = users
            .values()
            .map(|u| (u.user_id.clone(), u.win_count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    async fn leaderboard_rank(&self, user_id: &str) -> u32 {
        let users = self.users.read().await;
        let Some(target) = users.get(user_id) else {
            return 0;
        };
        let mut ranked: Vec<(String, u32)> = users
            .values()
            .map(|u| (u.user_id.clone(), u.win_count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
            .iter()
            .position(|(id, _)| id == &target.user_id)
            .map(|idx| idx as u32 + 1)
            .unwrap_or(0)
    }

    async fn session_put(&self, session_id: &str, data: &str, ttl_secs: u64) {
        self.sessions.write().await.insert(
            session_id.to_string(),
            SessionEntry {
                data: data.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
    }

    async fn session_get(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(session_id)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some(entry.data.clone())
    }

    async fn session_delete(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    async fn connected(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Durable backend
// ---------------------------------------------------------------------------

const LEADERBOARD_KEY: &str = "leaderboard:wins";

pub struct RedisUserStore {
    conn: ConnectionManager,
}

impl RedisUserStore {
    /// Connect using a connection-multiplexed client; one logical
    /// connection serves any number of concurrent callers.
    pub async fn connect(url: &str) -> Result<Self, ServerError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn user_key(user_id: &str) -> String {
        format!("user:{user_id}")
    }

    fn session_key(session_id: &str) -> String {
        format!("session:{session_id}")
    }
}

#[async_trait]
impl UserStore for RedisUserStore {
    async fn get(&self, user_id: &str) -> Option<User> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::user_key(user_id)).await.ok()?;
        raw.and_then(|json| serde_json::from_str(&json).ok())
    }

    async fn put(&self, mut user: User) {
        user.last_update = Utc::now();
        let mut conn = self.conn.clone();
        if let Ok(json) = serde_json::to_string(&user) {
            let _: Result<(), _> = conn.set(Self::user_key(&user.user_id), json).await;
        }
    }

    async fn delete(&self, user_id: &str) {
        let mut conn = self.conn.clone();
        let _: Result<(), _> = conn.del(Self::user_key(user_id)).await;
    }

    async fn list_all(&self) -> Vec<User> {
        let mut conn = self.conn.clone();
        let Ok(keys) = conn.keys::<_, Vec<String>>("user:*").await else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Ok(Some(json)) = conn.get::<_, Option<String>>(&key).await
                && let Ok(user) = serde_json::from_str::<User>(&json)
            {
                out.push(user);
            }
        }
        out
    }

    async fn leaderboard_upsert(&self, user_id: &str, win_count: u32) {
        let mut conn = self.conn.clone();
        let _: Result<(), _> = conn.zadd(LEADERBOARD_KEY, user_id, win_count).await;
    }

    async fn leaderboard_top(&self, n: usize) -> Vec<(String, u32)> {
        let mut conn = self.conn.clone();
        conn.zrevrange_withscores(LEADERBOARD_KEY, 0, n.saturating_sub(1) as isize)
            .await
            .unwrap_or_default()
    }

    async fn leaderboard_rank(&self, user_id: &str) -> u32 {
        let mut conn = self.conn.clone();
        let rank: Option<u64> = conn.zrevrank(LEADERBOARD_KEY, user_id).await.ok().flatten();
        rank.map(|r| r as u32 + 1).unwrap_or(0)
    }

    async fn session_put(&self, session_id: &str, data: &str, ttl_secs: u64) {
        let mut conn = self.conn.clone();
        let _: Result<(), _> = conn
            .set_ex(Self::session_key(session_id), data, ttl_secs)
            .await;
    }

    async fn session_get(&self, session_id: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        conn.get(Self::session_key(session_id)).await.ok()?
    }

    async fn session_delete(&self, session_id: &str) {
        let mut conn = self.conn.clone();
        let _: Result<(), _> = conn.del(Self::session_key(session_id)).await;
    }

    async fn connected(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// Dual-backend facade
// ---------------------------------------------------------------------------

pub struct DualUserStore {
    durable: Option<RedisUserStore>,
    memory: InMemoryUserStore,
}

impl DualUserStore {
    /// `durable` is `None` when Redis could not be reached at startup —
    /// the server still boots and runs entirely on the in-memory path.
    pub fn new(durable: Option<RedisUserStore>) -> Self {
        Self {
            durable,
            memory: InMemoryUserStore::new(),
        }
    }

    async fn durable_live(&self) -> Option<&RedisUserStore> {
        match &self.durable {
            Some(store) if store.connected().await => Some(store),
            _ => None,
        }
    }
}

#[async_trait]
impl UserStore for DualUserStore {
    async fn get(&self, user_id: &str) -> Option<User> {
        if let Some(store) = self.durable_live().await
            && let Some(user) = store.get(user_id).await
        {
            return Some(user);
        }
        self.memory.get(user_id).await
    }

    async fn put(&self, user: User) {
        // In-memory is authoritative and is written first so a durable
        // outage can never drop a just-accepted mutation.
        self.memory.put(user.clone()).await;
        if let Some(store) = self.durable_live().await {
            store.put(user).await;
        } else {
            tracing::warn!(user_id = %user.user_id, "durable user store unreachable, demoted to in-memory");
        }
    }

    async fn delete(&self, user_id: &str) {
        self.memory.delete(user_id).await;
        if let Some(store) = self.durable_live().await {
            store.delete(user_id).await;
        }
    }

    async fn list_all(&self) -> Vec<User> {
        if let Some(store) = self.durable_live().await {
            let durable_users = store.list_all().await;
            if !durable_users.is_empty() {
                return durable_users;
            }
        }
        self.memory.list_all().await
    }

    async fn leaderboard_upsert(&self, user_id: &str, win_count: u32) {
        self.memory.leaderboard_upsert(user_id, win_count).await;
        if let Some(store) = self.durable_live().await {
            store.leaderboard_upsert(user_id, win_count).await;
        }
    }

    async fn leaderboard_top(&self, n: usize) -> Vec<(String, u32)> {
        if let Some(store) = self.durable_live().await {
            return store.leaderboard_top(n).await;
        }
        self.memory.leaderboard_top(n).await
    }

    async fn leaderboard_rank(&self, user_id: &str) -> u32 {
        if let Some(store) = self.durable_live().await {
            return store.leaderboard_rank(user_id).await;
        }
        self.memory.leaderboard_rank(user_id).await
    }

    async fn session_put(&self, session_id: &str, data: &str, ttl_secs: u64) {
        self.memory.session_put(session_id, data, ttl_secs).await;
        if let Some(store) = self.durable_live().await {
            store.session_put(session_id, data, ttl_secs).await;
        }
    }

    async fn session_get(&self, session_id: &str) -> Option<String> {
        if let Some(store) = self.durable_live().await
            && let Some(data) = store.session_get(session_id).await
        {
            return Some(data);
        }
        self.memory.session_get(session_id).await
    }

    async fn session_delete(&self, session_id: &str) {
        self.memory.session_delete(session_id).await;
        if let Some(store) = self.durable_live().await {
            store.session_delete(session_id).await;
        }
    }

    async fn connected(&self) -> bool {
        self.durable_live().await.is_some()
    }
}

/// Shared handle the rest of the server holds.
pub type SharedUserStore = Arc<DualUserStore>;

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, wins: u32) -> User {
        let mut u = User::new(id, format!("name-{id}"), Utc::now());
        u.win_count = wins;
        u
    }

    #[tokio::test]
    async fn in_memory_round_trips_user() {
        let store = InMemoryUserStore::new();
        store.put(user("u1", 0)).await;
        let fetched = store.get("u1").await.unwrap();
        assert_eq!(fetched.user_id, "u1");
    }

    #[tokio::test]
    async fn in_memory_leaderboard_rank_and_top() {
        let store = InMemoryUserStore::new();
        store.put(user("a", 10)).await;
        store.put(user("b", 30)).await;
        store.put(user("c", 20)).await;

        let top = store.leaderboard_top(2).await;
        assert_eq!(top[0].0, "b");
        assert_eq!(top[1].0, "c");

        assert_eq!(store.leaderboard_rank("b").await, 1);
        assert_eq!(store.leaderboard_rank("c").await, 2);
        assert_eq!(store.leaderboard_rank("a").await, 3);
        assert_eq!(store.leaderboard_rank("missing").await, 0);
    }

    #[tokio::test]
    async fn in_memory_session_ttl_expires() {
        let store = InMemoryUserStore::new();
        store.session_put("s1", "payload", 0).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.session_get("s1").await.is_none());
    }

    #[tokio::test]
    async fn dual_store_falls_back_without_durable() {
        let dual = DualUserStore::new(None);
        assert!(!dual.connected().await);
        dual.put(user("solo", 5)).await;
        assert_eq!(dual.get("solo").await.unwrap().win_count, 5);
    }
}
