//! End-of-game ranking and credit application.
//!
//! Called exactly once per room, guarded by [`crate::domain::Room::settled`]
//! so a timer-fires escalation racing an explicit `win_game`/`leave_room`
//! transition can never double-credit.

use ludo_core::domain::PlayerStatus;
use ludo_core::protocol::{GameOverPayload, SettlementResult};

use crate::domain::Room;
use crate::user_store::UserStore;

/// Computes and applies settlement, returning the `game_over` payload.
/// A no-op (empty results) if the room was already settled.
pub async fn settle(room: &mut Room, store: &dyn UserStore) -> GameOverPayload {
    if room.settled {
        return GameOverPayload {
            results: Vec::new(),
        };
    }
    room.settled = true;

    let mut ranked: Vec<usize> = (0..room.players.len()).collect();
    ranked.sort_by_key(|&i| u8::from(room.players[i].status != PlayerStatus::Win));

    let mut results = Vec::with_capacity(ranked.len());
    for (rank_idx, &player_idx) in ranked.iter().enumerate() {
        let player_rank = (rank_idx + 1) as u32;
        let status = room.players[player_idx].status;
        let is_win = status == PlayerStatus::Win;
        let winning_coin = if is_win {
            winning_coin_for(room.max_players, player_rank, room.bet_amount)
        } else {
            0
        };

        let user_id = room.players[player_idx].user_id.clone();
        if let Some(mut user) = store.get(&user_id).await {
            user.coins += winning_coin;
            user.total_games_played += 1;
            if is_win {
                user.win_count += 1;
                user.recompute_level();
            } else {
                user.lost_count += 1;
            }
            store.put(user.clone()).await;
            store.leaderboard_upsert(&user_id, user.win_count).await;
        } else {
            tracing::warn!(%user_id, "settlement ran against an unknown user, skipping credit");
        }

        results.push(SettlementResult {
            user_id,
            winning_coin,
            player_rank,
            player_status: status,
        });
    }

    GameOverPayload { results }
}

/// Prize pool split: `max_players=2` pays rank-1 double the stake;
/// `max_players=4` pays 3x/1x to the top two WIN ranks. Non-WIN ranks
/// never receive a payout regardless of position.
fn winning_coin_for(max_players: u8, player_rank: u32, bet_amount: i64) -> i64 {
    match (max_players, player_rank) {
        (2, 1) => 2 * bet_amount,
        (4, 1) => 3 * bet_amount,
        (4, 2) => bet_amount,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ludo_core::domain::User;

    use super::*;
    use crate::domain::Player;
    use crate::user_store::InMemoryUserStore;

    fn player(user_id: &str, peer_id: u32, status: PlayerStatus) -> Player {
        Player {
            user_id: user_id.to_string(),
            user_name: user_id.to_string(),
            peer_id,
            status,
            numoftimeout: 0,
            joined_at: Utc::now(),
            tx: None,
        }
    }

    async fn seeded_store(ids: &[&str]) -> InMemoryUserStore {
        let store = InMemoryUserStore::new();
        for id in ids {
            store.put(User::new(*id, *id, Utc::now())).await;
        }
        store
    }

    #[tokio::test]
    async fn two_player_payout_splits_the_full_pool() {
        let store = seeded_store(&["a", "b"]).await;
        let mut room = Room::new("r1".to_string(), "a".to_string(), 100, 2, false, Utc::now());
        room.players = vec![
            player("a", 0, PlayerStatus::Win),
            player("b", 1, PlayerStatus::Left),
        ];

        let payload = settle(&mut room, &store).await;
        assert_eq!(payload.results.len(), 2);
        let total: i64 = payload.results.iter().map(|r| r.winning_coin).sum();
        assert_eq!(total, 200);

        let a = store.get("a").await.unwrap();
        assert_eq!(a.coins, 1000 + 200);
        assert_eq!(a.win_count, 1);
        let b = store.get("b").await.unwrap();
        assert_eq!(b.coins, 1000);
        assert_eq!(b.lost_count, 1);
    }

    #[tokio::test]
    async fn four_player_payout_pays_top_two_win_ranks() {
        let store = seeded_store(&["p0", "p1", "p2", "p3"]).await;
        let mut room = Room::new("r2".to_string(), "p0".to_string(), 50, 4, false, Utc::now());
        room.players = vec![
            player("p0", 0, PlayerStatus::Win),
            player("p1", 1, PlayerStatus::Win),
            player("p2", 2, PlayerStatus::Left),
            player("p3", 3, PlayerStatus::Left),
        ];

        let payload = settle(&mut room, &store).await;
        let by_id: std::collections::HashMap<_, _> = payload
            .results
            .iter()
            .map(|r| (r.user_id.clone(), r.winning_coin))
            .collect();
        assert_eq!(by_id["p0"], 150);
        assert_eq!(by_id["p1"], 50);
        assert_eq!(by_id["p2"], 0);
        assert_eq!(by_id["p3"], 0);
    }

    #[tokio::test]
    async fn settlement_is_idempotent() {
        let store = seeded_store(&["a", "b"]).await;
        let mut room = Room::new("r3".to_string(), "a".to_string(), 100, 2, false, Utc::now());
        room.players = vec![
            player("a", 0, PlayerStatus::Win),
            player("b", 1, PlayerStatus::Left),
        ];

        settle(&mut room, &store).await;
        let second = settle(&mut room, &store).await;
        assert!(second.results.is_empty());

        let a = store.get("a").await.unwrap();
        assert_eq!(a.coins, 1200);
    }
}
