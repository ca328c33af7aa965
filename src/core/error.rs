//! Error types for the streaming engine

use thiserror::Error;

/// Recoverable streaming errors.
///
/// Conditions the engine cannot recover from (streaming-buffer exhaustion,
/// a chunk payload with no animation resource, a missing first chunk) are
/// hard panics instead: rendering must never see garbage clip data, so the
/// engine halts cleanly.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read returned {actual} bytes, expected {expected}")]
    TruncatedRead { expected: usize, actual: usize },

    #[error("failed to open anim stream '{stream}': {source}")]
    OpenFailed {
        stream: String,
        source: std::io::Error,
    },

    #[error("no free stream loader")]
    PoolExhausted,

    #[error("anim stream registry is full")]
    RegistryFull,

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
