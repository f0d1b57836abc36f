//! Netplay session lifecycle
//!
//! [`NetplaySession`] owns the transport engine, the snapshot codec, and the
//! metrics collector, and exposes the lifecycle the frontend drives:
//! initialize once, feed it every displayed frame, poll metrics, shut down.
//! One session may exist per process; a second initialize attempt fails with
//! [`NetplayError::SessionConflict`] until the first shuts down.
//!
//! Lifecycle calls return `Result`; the per-frame calls return plain `bool`
//! and park the cause in [`NetplaySession::last_error`], since a dropped
//! frame is routine and the caller only branches on success.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::codec::StateCodec;
use crate::emulator::EmulatedSystem;
use crate::engine::{
    EngineCallbacks, EngineEvent, EngineOptions, EnginePlayer, PlayerHandle, RollbackEngine,
    SavedState,
};
use crate::error::NetplayError;
use crate::frame::apply_synchronized_inputs;
use crate::input::{INPUT_BLOCK_BYTES, InputBlock};
use crate::metrics::{MetricsCollector, RollbackMetrics};

/// Game identifier both peers must agree on during the engine handshake
pub const GAME_IDENTIFIER: &str = "mupen64plus";

/// Smallest session size
pub const MIN_PLAYERS: usize = 2;

/// Largest session size
pub const MAX_PLAYERS: usize = 4;

// One session per process. The emulator core this crate wraps is itself a
// process-wide singleton, so a second session could only corrupt it.
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Parameters for starting a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// This machine's player number, 1-based
    pub local_player: usize,
    /// Remote peer addresses in ascending player order, skipping the local
    /// slot
    pub peers: Vec<SocketAddr>,
    /// Local UDP port to bind
    pub local_port: u16,
    /// Frames the local input is delayed before submission
    pub frame_delay: usize,
}

impl SessionConfig {
    /// Total players in the session, local included
    pub fn total_players(&self) -> usize {
        self.peers.len() + 1
    }
}

/// A rollback netplay session over a transport engine
pub struct NetplaySession<E: RollbackEngine> {
    engine: E,
    codec: StateCodec,
    metrics: MetricsCollector,
    local_handle: PlayerHandle,
    remote_handles: Vec<PlayerHandle>,
    num_players: usize,
    input_sequence: u32,
    current_frame: u32,
    desynced: bool,
    initialized: bool,
    last_error: Option<NetplayError>,
}

impl<E: RollbackEngine> NetplaySession<E> {
    /// Create a session over the given engine with default codec sizing
    pub fn new(engine: E) -> Self {
        Self::with_codec(engine, StateCodec::with_defaults())
    }

    /// Create a session over the given engine and codec
    pub fn with_codec(engine: E, codec: StateCodec) -> Self {
        Self {
            engine,
            codec,
            metrics: MetricsCollector::new(),
            local_handle: 0,
            remote_handles: Vec::new(),
            num_players: 0,
            input_sequence: 0,
            current_frame: 0,
            desynced: false,
            initialized: false,
            last_error: None,
        }
    }

    /// Start the session
    ///
    /// Calling this on an already-initialized session is a no-op success, so
    /// a frontend retrying its startup path cannot double-start. On any
    /// failure after the process-wide slot is claimed, the slot is released
    /// and the engine torn back down.
    pub fn initialize(&mut self, config: &SessionConfig) -> Result<(), NetplayError> {
        if self.initialized {
            log::debug!("session already initialized, ignoring");
            return Ok(());
        }

        let total = config.total_players();
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&total) {
            return Err(NetplayError::Configuration(format!(
                "session size {total} outside {MIN_PLAYERS}..={MAX_PLAYERS}"
            )));
        }
        if !(1..=total).contains(&config.local_player) {
            return Err(NetplayError::Configuration(format!(
                "local player {} outside 1..={total}",
                config.local_player
            )));
        }

        if SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NetplayError::SessionConflict);
        }

        match self.start_engine(config, total) {
            Ok(()) => {
                self.num_players = total;
                self.input_sequence = 0;
                self.current_frame = 0;
                self.desynced = false;
                self.last_error = None;
                self.metrics.reset();
                self.initialized = true;
                log::info!(
                    "netplay session initialized: player {}/{total}, delay {}",
                    config.local_player,
                    config.frame_delay
                );
                Ok(())
            }
            Err(err) => {
                self.engine.close();
                self.remote_handles.clear();
                SESSION_ACTIVE.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn start_engine(&mut self, config: &SessionConfig, total: usize) -> Result<(), NetplayError> {
        self.engine.start(EngineOptions {
            game_id: GAME_IDENTIFIER,
            num_players: total,
            input_size: INPUT_BLOCK_BYTES,
            local_port: config.local_port,
        })?;

        self.remote_handles.clear();
        let mut peers = config.peers.iter();
        for slot in 1..=total {
            if slot == config.local_player {
                self.local_handle = self.engine.add_player(EnginePlayer::Local)?;
            } else {
                // Validated above: exactly total - 1 peers
                let addr = *peers.next().ok_or_else(|| {
                    NetplayError::Configuration("missing peer address".to_string())
                })?;
                let handle = self.engine.add_player(EnginePlayer::Remote(addr))?;
                self.remote_handles.push(handle);
            }
        }

        self.engine
            .set_frame_delay(self.local_handle, config.frame_delay)
    }

    /// Tear the session down and release the process-wide slot
    ///
    /// Safe to call repeatedly; only the first call does anything.
    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        self.engine.close();
        self.remote_handles.clear();
        self.initialized = false;
        self.input_sequence = 0;
        self.current_frame = 0;
        self.desynced = false;
        self.metrics.reset();
        SESSION_ACTIVE.store(false, Ordering::SeqCst);
        log::info!("netplay session shut down");
    }

    /// Submit the local player's input for the current frame
    pub fn add_local_input(&mut self, input: &InputBlock) -> bool {
        if !self.initialized {
            return self.fail(NetplayError::Engine("session not initialized".to_string()));
        }
        match self.engine.add_local_input(self.local_handle, input) {
            Ok(()) => {
                self.input_sequence = self.input_sequence.wrapping_add(1);
                true
            }
            Err(err) => self.fail(err),
        }
    }

    /// Step the session one frame
    ///
    /// Drives the engine, which may save, load, and re-simulate states on
    /// `system` before the call returns. Returns false when the frame must
    /// be skipped (still synchronizing, waiting on remote input, or a
    /// failure recorded in [`NetplaySession::last_error`]).
    pub fn advance_frame(&mut self, system: &mut dyn EmulatedSystem) -> bool {
        if !self.initialized {
            return self.fail(NetplayError::Engine("session not initialized".to_string()));
        }
        if self.desynced {
            return self.fail(NetplayError::Engine(
                "session desynchronized from peer".to_string(),
            ));
        }

        let result = {
            let mut bridge = CallbackBridge {
                system,
                codec: &mut self.codec,
                metrics: &mut self.metrics,
                input_sequence: &mut self.input_sequence,
                desynced: &mut self.desynced,
            };
            self.engine.advance_frame(&mut bridge)
        };

        match result {
            Ok(()) => {
                self.current_frame = self.current_frame.wrapping_add(1);
                self.sample_network_stats();
                true
            }
            Err(err) => self.fail(err),
        }
    }

    /// Copy the agreed per-player inputs for the current frame into `out`
    ///
    /// `out` must be exactly `num_players` wire blocks long.
    pub fn get_synchronized_inputs(&mut self, out: &mut [u8]) -> bool {
        if !self.initialized {
            return self.fail(NetplayError::Engine("session not initialized".to_string()));
        }
        if self.desynced {
            return self.fail(NetplayError::Engine(
                "session desynchronized from peer".to_string(),
            ));
        }
        match self.engine.synchronize_inputs(out) {
            Ok(()) => true,
            Err(err) => self.fail(err),
        }
    }

    fn sample_network_stats(&mut self) {
        let Some(&handle) = self.remote_handles.first() else {
            return;
        };
        if let Some(stats) = self.engine.network_stats(handle) {
            self.metrics.on_network_stats(&stats);
        }
    }

    fn fail(&mut self, err: NetplayError) -> bool {
        log::debug!("netplay frame operation failed: {err}");
        self.last_error = Some(err);
        false
    }

    /// Whether initialize has succeeded and shutdown has not run
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether a peer desync was detected; the session is unrecoverable
    pub fn has_desynced(&self) -> bool {
        self.desynced
    }

    /// Players in the session
    pub fn num_players(&self) -> usize {
        self.num_players
    }

    /// Displayed frames advanced since initialize
    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    /// Inputs submitted since initialize, rewound on rollback
    pub fn input_sequence(&self) -> u32 {
        self.input_sequence
    }

    /// Current rollback and network metrics
    pub fn metrics(&self) -> RollbackMetrics {
        self.metrics.snapshot()
    }

    /// Read and clear the "rollback just occurred" notification
    pub fn rollback_just_occurred(&mut self) -> bool {
        self.metrics.take_rollback_latch()
    }

    /// Cause of the most recent failed frame operation
    pub fn last_error(&self) -> Option<&NetplayError> {
        self.last_error.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

impl<E: RollbackEngine> Drop for NetplaySession<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bound callback state handed to the engine for one step
///
/// Borrows disjoint session fields so the engine can drive saves, loads,
/// and re-simulation without reaching back into the session.
struct CallbackBridge<'a> {
    system: &'a mut dyn EmulatedSystem,
    codec: &'a mut StateCodec,
    metrics: &'a mut MetricsCollector,
    input_sequence: &'a mut u32,
    desynced: &'a mut bool,
}

impl EngineCallbacks for CallbackBridge<'_> {
    fn begin_game(&mut self, game_id: &str) -> bool {
        if game_id != GAME_IDENTIFIER {
            log::error!("engine began unknown game {game_id:?}");
            return false;
        }
        true
    }

    fn save_state(&mut self, frame: u32) -> Option<SavedState> {
        match self.codec.save(self.system, frame, *self.input_sequence) {
            Ok(snapshot) => Some(SavedState {
                buffer: snapshot.buffer,
                len: snapshot.len,
                checksum: snapshot.checksum,
            }),
            Err(err) => {
                log::error!("state save at frame {frame} failed: {err}");
                None
            }
        }
    }

    fn load_state(&mut self, data: &[u8]) -> bool {
        match self.codec.load(self.system, data) {
            Ok(outcome) => {
                // The restored state predates inputs submitted since the
                // save, so the counter rewinds with it
                *self.input_sequence = outcome.input_sequence;
                true
            }
            Err(err) => {
                log::error!("state load failed: {err}");
                false
            }
        }
    }

    fn free_buffer(&mut self, buffer: crate::pool::PooledBuffer) {
        self.codec.free(buffer);
    }

    fn advance_frame(&mut self, inputs: &[u8]) -> bool {
        if !apply_synchronized_inputs(self.system, inputs) {
            return false;
        }
        match self.system.step() {
            Ok(()) => true,
            Err(err) => {
                log::error!("re-simulation step failed: {err}");
                false
            }
        }
    }

    fn on_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ConnectedToPeer { player } => {
                log::info!("connected to peer {player}");
            }
            EngineEvent::DisconnectedFromPeer { player } => {
                log::warn!("peer {player} disconnected");
            }
            EngineEvent::ConnectionInterrupted { player, timeout_ms } => {
                log::warn!("peer {player} interrupted, disconnect in {timeout_ms}ms");
            }
            EngineEvent::ConnectionResumed { player } => {
                log::info!("peer {player} resumed");
            }
            EngineEvent::Desync {
                frame,
                local_checksum,
                remote_checksum,
            } => {
                log::error!(
                    "desync at frame {frame}: local {local_checksum:#018x}, \
                     remote {remote_checksum:#018x}"
                );
                *self.desynced = true;
            }
            EngineEvent::TimeSync { .. } | EngineEvent::Rollback { .. } => {}
        }
        self.metrics.on_event(&event);
    }
}
