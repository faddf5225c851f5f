//! Maps logged-in users to their live transport handle.
//!
//! A user can hold at most one active connection: `add_user` on a second
//! socket replaces whatever handle was registered for that `user_id`,
//! silently orphaning the old socket's outbound channel (the WebSocket
//! write loop on that side simply stops receiving frames and the
//! connection is torn down on its own read-half EOF or a later `leave`).

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::domain::PlayerTx;

#[derive(Default)]
pub struct SessionRegistry {
    by_user: RwLock<HashMap<String, PlayerTx>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the live handle for `user_id`.
    pub async fn register(&self, user_id: &str, tx: PlayerTx) {
        self.by_user.write().await.insert(user_id.to_string(), tx);
    }

    /// Removes the mapping, but only if it still points at `tx` — guards
    /// against a disconnect handler racing a newer connection's `register`.
    pub async fn remove_if_current(&self, user_id: &str, tx: &PlayerTx) {
        let mut guard = self.by_user.write().await;
        if let Some(current) = guard.get(user_id)
            && current.same_channel(tx)
        {
            guard.remove(user_id);
        }
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.by_user.read().await.contains_key(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.by_user.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("u1", tx).await;
        assert!(registry.is_connected("u1").await);
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn remove_if_current_ignores_stale_handle() {
        let registry = SessionRegistry::new();
        let (tx_old, _rx_old) = mpsc::unbounded_channel();
        let (tx_new, _rx_new) = mpsc::unbounded_channel();
        registry.register("u1", tx_old.clone()).await;
        registry.register("u1", tx_new).await;

        // A disconnect handler for the old socket must not evict the
        // newer registration.
        registry.remove_if_current("u1", &tx_old).await;
        assert!(registry.is_connected("u1").await);
    }

    #[tokio::test]
    async fn remove_if_current_evicts_matching_handle() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("u1", tx.clone()).await;
        registry.remove_if_current("u1", &tx).await;
        assert!(!registry.is_connected("u1").await);
    }
}
