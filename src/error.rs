//! Error taxonomy for the rollback netplay core
//!
//! Codec and pool failures are folded into the caller's boolean result at the
//! session surface; nothing here crosses the engine callback boundary.

use thiserror::Error;

/// Errors produced by the rollback netplay core
#[derive(Debug, Clone, Error)]
pub enum NetplayError {
    /// Invalid session parameters (player index, player count, address)
    #[error("invalid session configuration: {0}")]
    Configuration(String),

    /// A rollback session is already active in this process
    #[error("another rollback session is already active")]
    SessionConflict,

    /// The transport engine reported a failure
    #[error("transport engine error: {0}")]
    Engine(String),

    /// Snapshot envelope magic or version mismatch
    #[error("snapshot format mismatch: {0}")]
    Format(String),

    /// Snapshot length or declared size is inconsistent
    #[error("snapshot size invalid: {0}")]
    Size(String),

    /// State serialization, compression, or decompression failed
    #[error("state codec failure: {0}")]
    Codec(String),

    /// No state buffer available from the pool
    #[error("state buffer pool exhausted")]
    ResourceExhausted,

    /// The emulated system rejected a state restore
    #[error("state restore failed: {0}")]
    Restore(String),
}
