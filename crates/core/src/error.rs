// Error types for portvault

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid tunnel spec: {0}")]
    InvalidSpec(String),

    #[error("Tunnel '{name}' failed to connect: {reason}")]
    Connection { name: String, reason: String },

    #[error("Malformed session blob: {0}")]
    Format(String),

    #[error("Decryption failed: wrong password or corrupted session file")]
    Integrity,

    #[error("Session data error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
