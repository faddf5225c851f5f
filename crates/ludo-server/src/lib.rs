//! Realtime multiplayer coordinator for Ludo.
//!
//! `main.rs` is a thin binary over this library; integration tests drive
//! [`dispatcher::dispatch`] and [`game_logic`] directly against an
//! [`user_store::InMemoryUserStore`]-backed [`user_store::DualUserStore`],
//! without opening real sockets.

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod game_logic;
pub mod room;
pub mod session;
pub mod settlement;
pub mod status;
pub mod user_store;
pub mod ws_handler;
