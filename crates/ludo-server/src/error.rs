//! Server-level error taxonomy.
//!
//! [`ludo_core::error::LudoError`] covers protocol/domain failures that can
//! be reasoned about without I/O; this enum adds the backend-specific
//! failure modes the user store and transport layer introduce. Neither is
//! ever serialized wholesale to a client — only the taxonomy-specific
//! outbound events in `ludo_core::protocol` carry client-facing text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Ludo(#[from] ludo_core::error::LudoError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
