//! Transport engine contract
//!
//! The rollback transport (peer input exchange, prediction, time sync) is a
//! collaborator behind the [`RollbackEngine`] trait so alternative or mock
//! engines are substitutable in tests. Inbound callbacks are a bound
//! [`EngineCallbacks`] value passed into every engine step; there is no
//! global callback state.
//!
//! The default implementation is [`GgrsEngine`], backed by the `ggrs`
//! rollback library over UDP.

use std::net::SocketAddr;

use crate::error::NetplayError;
use crate::input::InputBlock;
use crate::pool::PooledBuffer;

mod ggrs;

pub use self::ggrs::GgrsEngine;

/// Engine-assigned player identity
pub type PlayerHandle = usize;

/// A player slot registered with the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePlayer {
    /// The player on this machine
    Local,
    /// A networked peer at the given address
    Remote(SocketAddr),
}

/// Parameters for starting an engine session
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Fixed game identifier both peers must agree on
    pub game_id: &'static str,
    /// Total players in the session
    pub num_players: usize,
    /// Bytes per player per frame
    pub input_size: usize,
    /// Local UDP port to bind
    pub local_port: u16,
}

/// Periodic network statistics sampled from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineNetworkStats {
    /// Round-trip time in milliseconds
    pub ping_ms: u32,
    /// Frames the local simulation trails the remote
    pub local_frames_behind: i32,
    /// Frames the remote simulation trails the local (frames it is
    /// predicting our input for)
    pub remote_frames_behind: i32,
}

/// Events the engine reports during stepping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Handshake with a peer completed
    ConnectedToPeer {
        /// Peer player handle
        player: PlayerHandle,
    },
    /// A peer left or timed out
    DisconnectedFromPeer {
        /// Peer player handle
        player: PlayerHandle,
    },
    /// A peer stopped responding; disconnect follows if it stays silent
    ConnectionInterrupted {
        /// Peer player handle
        player: PlayerHandle,
        /// Milliseconds until the engine declares a disconnect
        timeout_ms: u64,
    },
    /// An interrupted peer resumed sending
    ConnectionResumed {
        /// Peer player handle
        player: PlayerHandle,
    },
    /// Simulation skew report from the engine's time-sync layer
    TimeSync {
        /// Signed frames the remote is ahead of the local simulation
        frames_ahead: i32,
    },
    /// A rollback happened while reconciling remote input
    ///
    /// Explicit signal, not inferred from time-sync skew.
    Rollback {
        /// Frames that were rewound and re-simulated
        depth: u32,
    },
    /// Peer state checksums diverged; the session cannot recover
    Desync {
        /// Frame the divergence was detected at
        frame: i32,
        /// Locally computed checksum
        local_checksum: u64,
        /// Checksum reported by the peer
        remote_checksum: u64,
    },
}

/// A saved state envelope handed to the engine
///
/// The engine owns the buffer until it gives it back through
/// [`EngineCallbacks::free_buffer`].
#[derive(Debug)]
pub struct SavedState {
    /// Envelope buffer from the codec's pool
    pub buffer: PooledBuffer,
    /// Valid bytes at the front of the buffer
    pub len: usize,
    /// Checksum captured at save time
    pub checksum: u64,
}

/// Inbound callbacks the engine drives while stepping
///
/// All callbacks run synchronously on the emulation thread and report only
/// success or failure; causes stay on the session side.
pub trait EngineCallbacks {
    /// Session is starting for the given game identifier
    fn begin_game(&mut self, game_id: &str) -> bool;

    /// Capture the current simulation state
    ///
    /// `None` signals an unrecoverable save failure for this frame.
    fn save_state(&mut self, frame: u32) -> Option<SavedState>;

    /// Restore the simulation from a previously saved envelope
    fn load_state(&mut self, data: &[u8]) -> bool;

    /// The engine is done with a saved buffer
    fn free_buffer(&mut self, buffer: PooledBuffer);

    /// Re-simulate one frame with the given synchronized inputs
    /// (`num_players` consecutive wire blocks)
    fn advance_frame(&mut self, inputs: &[u8]) -> bool;

    /// An engine event occurred
    fn on_event(&mut self, event: EngineEvent);
}

/// Contract for a rollback transport engine
///
/// Call order per session: `start`, `add_player` for every slot,
/// `set_frame_delay` for the local slot, then per displayed frame
/// `add_local_input` / `advance_frame` / `synchronize_inputs`, and finally
/// `close`. `advance_frame` may invoke any number of callbacks before it
/// returns.
pub trait RollbackEngine {
    /// Begin a session with the given parameters
    fn start(&mut self, options: EngineOptions) -> Result<(), NetplayError>;

    /// Register a player slot; returns the handle for later calls
    fn add_player(&mut self, player: EnginePlayer) -> Result<PlayerHandle, NetplayError>;

    /// Hold a local player's input for `delay` frames before submission
    fn set_frame_delay(&mut self, player: PlayerHandle, delay: usize)
    -> Result<(), NetplayError>;

    /// Submit the local player's input for the current frame
    fn add_local_input(
        &mut self,
        player: PlayerHandle,
        input: &InputBlock,
    ) -> Result<(), NetplayError>;

    /// Copy the agreed per-player inputs for the current frame into `out`
    /// (`num_players` consecutive wire blocks)
    fn synchronize_inputs(&mut self, out: &mut [u8]) -> Result<(), NetplayError>;

    /// Step the engine one frame, driving callbacks as needed
    fn advance_frame(&mut self, callbacks: &mut dyn EngineCallbacks) -> Result<(), NetplayError>;

    /// Sample network statistics for a remote player
    fn network_stats(&mut self, player: PlayerHandle) -> Option<EngineNetworkStats>;

    /// Tear the session down; further calls fail until `start` runs again
    fn close(&mut self);
}
