//! Shared error taxonomy.
//!
//! Event handlers never let these escape to the transport loop (see
//! `ludo_server::dispatcher`); they are caught, logged, and in some cases
//! translated into a client-facing outbound event.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LudoError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("room '{0}' not found")]
    RoomNotFound(String),

    #[error("invalid room code '{0}'")]
    InvalidRoomCode(String),
}
