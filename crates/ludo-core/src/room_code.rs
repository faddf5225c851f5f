//! Friend-room code generation and validation.
//!
//! Friend rooms are keyed by a 6-character uppercase alphanumeric code that
//! lives in the same keyspace as matchmade room ids, so a collision check
//! against the room registry is still required by the caller.

use rand::RngExt;

use crate::error::LudoError;

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Mint a fresh 6-character uppercase room code.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ROOM_CODE_ALPHABET.len());
            ROOM_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Validate a client-supplied room code: exactly 6 uppercase alphanumeric
/// characters.
pub fn validate_room_code(code: &str) -> Result<(), LudoError> {
    if code.len() != ROOM_CODE_LEN || !code.chars().all(|c| c.is_ascii_alphanumeric() && (c.is_ascii_digit() || c.is_ascii_uppercase())) {
        return Err(LudoError::InvalidRoomCode(code.to_string()));
    }
    Ok(())
}
