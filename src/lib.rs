//! Rollback netplay for deterministic emulator cores
//!
//! Wraps a deterministic emulated system with GGRS-based rollback netcode:
//! peers exchange per-frame controller inputs, the simulation speculates on
//! predicted input, and confirmed remote input that contradicts a
//! prediction rolls the state back and re-simulates.
//!
//! # Architecture
//!
//! - [`EmulatedSystem`] - Trait the wrapped emulator core implements
//! - [`NetplaySession`] - Session lifecycle over a [`RollbackEngine`]
//! - [`FrameDriver`] - Per-frame hook run before the emulator executes a frame
//! - [`StateCodec`] - Compressed snapshot envelopes over a buffer pool
//! - [`GgrsEngine`] - Default transport engine, GGRS over UDP

pub mod codec;
pub mod emulator;
pub mod engine;
pub mod error;
pub mod frame;
pub mod input;
#[cfg(test)]
mod integration;
pub mod metrics;
pub mod pool;
pub mod session;
#[cfg(test)]
pub mod test_utils;

// Re-export the session surface
pub use emulator::{ControllerState, EmulatedSystem};
pub use error::NetplayError;
pub use frame::FrameDriver;
pub use session::{
    GAME_IDENTIFIER, MAX_PLAYERS, MIN_PLAYERS, NetplaySession, SessionConfig,
};

// Re-export the engine seam and its default implementation
pub use engine::{
    EngineCallbacks, EngineEvent, EngineNetworkStats, EngineOptions, EnginePlayer, GgrsEngine,
    PlayerHandle, RollbackEngine, SavedState,
};

// Re-export codec and metrics types polled by frontends
pub use codec::{
    CodecStats, SNAPSHOT_MAGIC, SNAPSHOT_VERSION, Snapshot, SnapshotHeader, StateCodec,
};
pub use input::{Buttons, INPUT_BLOCK_BYTES, InputBlock};
pub use metrics::{MetricsCollector, RollbackMetrics};
pub use pool::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_BUFFERS, PooledBuffer, StateBufferPool};
