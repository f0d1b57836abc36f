//! Shared test doubles
//!
//! [`MockSystem`] is a fake emulator core whose whole state is one byte
//! vector; [`MockEngine`] is a scriptable transport engine that honors the
//! save/load/free callback contract without any networking. Tests that
//! claim the process-wide session slot serialize through [`session_lock`].

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, bail};

use crate::emulator::{ControllerState, EmulatedSystem};
use crate::engine::{
    EngineCallbacks, EngineEvent, EngineNetworkStats, EngineOptions, EnginePlayer, PlayerHandle,
    RollbackEngine,
};
use crate::error::NetplayError;
use crate::input::{INPUT_BLOCK_BYTES, InputBlock};

/// Serialize tests that claim the process-wide session slot
pub fn session_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    // A panicking test must not wedge the rest of the suite
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Fake emulator core backed by a byte vector
pub struct MockSystem {
    state: Vec<u8>,
    seed: u32,
    fail_save: bool,
    fail_load: bool,
    load_calls: usize,
    /// Per-port connection flags
    pub connected: [bool; 4],
    /// What [`EmulatedSystem::read_controller`] reports per port
    pub controller_inputs: [ControllerState; 4],
    /// Every `(port, state)` pair applied via `set_controller`
    pub applied: Vec<(usize, ControllerState)>,
    /// Frames stepped via [`EmulatedSystem::step`]
    pub steps: usize,
}

impl MockSystem {
    pub fn with_state(state: Vec<u8>) -> Self {
        Self {
            state,
            seed: 0,
            fail_save: false,
            fail_load: false,
            load_calls: 0,
            connected: [true; 4],
            controller_inputs: [ControllerState::default(); 4],
            applied: Vec::new(),
            steps: 0,
        }
    }

    pub fn set_state(&mut self, state: Vec<u8>) {
        self.state = state;
    }

    pub fn state(&self) -> &[u8] {
        &self.state
    }

    pub fn set_seed(&mut self, seed: u32) {
        self.seed = seed;
    }

    /// Make the next save attempt fail
    pub fn fail_next_save(&mut self) {
        self.fail_save = true;
    }

    /// Make the next load attempt fail
    pub fn fail_next_load(&mut self) {
        self.fail_load = true;
    }

    /// Successful restores so far
    pub fn load_calls(&self) -> usize {
        self.load_calls
    }
}

impl EmulatedSystem for MockSystem {
    fn save_state(&mut self, buf: &mut [u8]) -> Result<usize> {
        if std::mem::take(&mut self.fail_save) {
            bail!("injected save failure");
        }
        if buf.len() < self.state.len() {
            bail!("state buffer too small");
        }
        buf[..self.state.len()].copy_from_slice(&self.state);
        Ok(self.state.len())
    }

    fn load_state(&mut self, data: &[u8]) -> Result<()> {
        if std::mem::take(&mut self.fail_load) {
            bail!("injected load failure");
        }
        self.state = data.to_vec();
        self.load_calls += 1;
        Ok(())
    }

    fn controller_connected(&self, port: usize) -> bool {
        port < self.connected.len() && self.connected[port]
    }

    fn read_controller(&mut self, port: usize) -> Option<ControllerState> {
        if self.controller_connected(port) {
            Some(self.controller_inputs[port])
        } else {
            None
        }
    }

    fn set_controller(&mut self, port: usize, state: &ControllerState) -> bool {
        if port >= self.connected.len() {
            return false;
        }
        self.applied.push((port, *state));
        true
    }

    fn determinism_seed(&mut self) -> u32 {
        self.seed
    }

    fn step(&mut self) -> Result<()> {
        self.steps += 1;
        Ok(())
    }
}

/// Scriptable in-process transport engine
///
/// Saves every frame through the callback contract (copying the envelope
/// and returning the pooled buffer immediately, like the real engine), and
/// replays queued events and rollbacks on the next step.
pub struct MockEngine {
    started: bool,
    begin_sent: bool,
    frame: u32,
    num_players: usize,
    /// Player slots in registration order
    pub players: Vec<EnginePlayer>,
    /// `(handle, delay)` pairs from `set_frame_delay`
    pub frame_delays: Vec<(PlayerHandle, usize)>,
    /// Stats handed back from `network_stats`
    pub stats: Option<EngineNetworkStats>,
    /// Last submitted input per player slot, echoed back as the frame's
    /// agreed inputs
    inputs: Vec<InputBlock>,
    saved: Vec<Vec<u8>>,
    synced: Vec<u8>,
    queued_events: VecDeque<EngineEvent>,
    queued_rollback: Option<u32>,
    stall_next: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            started: false,
            begin_sent: false,
            frame: 0,
            num_players: 0,
            players: Vec::new(),
            frame_delays: Vec::new(),
            stats: None,
            inputs: Vec::new(),
            saved: Vec::new(),
            synced: Vec::new(),
            queued_events: VecDeque::new(),
            queued_rollback: None,
            stall_next: false,
        }
    }

    /// Deliver an event on the next step
    pub fn queue_event(&mut self, event: EngineEvent) {
        self.queued_events.push_back(event);
    }

    /// Roll back `depth` frames on the next step: restore the state saved
    /// `depth` frames ago, re-simulate, and report a rollback event
    pub fn queue_rollback(&mut self, depth: u32) {
        self.queued_rollback = Some(depth);
    }

    /// Fail the next step as if the session were still waiting on a peer
    pub fn stall_next_frame(&mut self) {
        self.stall_next = true;
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RollbackEngine for MockEngine {
    fn start(&mut self, options: EngineOptions) -> Result<(), NetplayError> {
        if self.started {
            return Err(NetplayError::Engine("engine already started".to_string()));
        }
        self.started = true;
        self.begin_sent = false;
        self.frame = 0;
        self.num_players = options.num_players;
        self.players.clear();
        self.frame_delays.clear();
        self.inputs = vec![InputBlock::default(); options.num_players];
        self.saved.clear();
        self.synced.clear();
        Ok(())
    }

    fn add_player(&mut self, player: EnginePlayer) -> Result<PlayerHandle, NetplayError> {
        if !self.started {
            return Err(NetplayError::Engine("engine not started".to_string()));
        }
        self.players.push(player);
        Ok(self.players.len() - 1)
    }

    fn set_frame_delay(
        &mut self,
        player: PlayerHandle,
        delay: usize,
    ) -> Result<(), NetplayError> {
        if player >= self.players.len() {
            return Err(NetplayError::Engine(format!("unknown player {player}")));
        }
        self.frame_delays.push((player, delay));
        Ok(())
    }

    fn add_local_input(
        &mut self,
        player: PlayerHandle,
        input: &InputBlock,
    ) -> Result<(), NetplayError> {
        if !self.started {
            return Err(NetplayError::Engine("engine not started".to_string()));
        }
        if player >= self.players.len() {
            return Err(NetplayError::Engine(format!("unknown player {player}")));
        }
        self.inputs[player] = *input;
        Ok(())
    }

    fn synchronize_inputs(&mut self, out: &mut [u8]) -> Result<(), NetplayError> {
        if self.synced.is_empty() {
            return Err(NetplayError::Engine(
                "no synchronized inputs for this frame".to_string(),
            ));
        }
        if out.len() != self.synced.len() {
            return Err(NetplayError::Engine("input buffer size mismatch".to_string()));
        }
        out.copy_from_slice(&self.synced);
        Ok(())
    }

    fn advance_frame(&mut self, callbacks: &mut dyn EngineCallbacks) -> Result<(), NetplayError> {
        if !self.started {
            return Err(NetplayError::Engine("engine not started".to_string()));
        }
        if std::mem::take(&mut self.stall_next) {
            return Err(NetplayError::Engine(
                "session is still synchronizing".to_string(),
            ));
        }
        if !self.begin_sent {
            self.begin_sent = true;
            if !callbacks.begin_game(crate::session::GAME_IDENTIFIER) {
                return Err(NetplayError::Engine("begin game rejected".to_string()));
            }
        }

        while let Some(event) = self.queued_events.pop_front() {
            callbacks.on_event(event);
        }

        let mut packed = Vec::with_capacity(self.num_players * INPUT_BLOCK_BYTES);
        for input in &self.inputs {
            packed.extend_from_slice(input.as_wire());
        }

        if let Some(depth) = self.queued_rollback.take() {
            let index = self.saved.len().saturating_sub(depth as usize);
            let Some(envelope) = self.saved.get(index.min(self.saved.len().saturating_sub(1)))
            else {
                return Err(NetplayError::Engine("no saved state to load".to_string()));
            };
            if !callbacks.load_state(envelope) {
                return Err(NetplayError::Engine("state load failed".to_string()));
            }
            for _ in 0..depth {
                if !callbacks.advance_frame(&packed) {
                    return Err(NetplayError::Engine(
                        "re-simulation step failed".to_string(),
                    ));
                }
            }
            callbacks.on_event(EngineEvent::Rollback { depth });
        }

        let Some(saved) = callbacks.save_state(self.frame) else {
            return Err(NetplayError::Engine("state save failed".to_string()));
        };
        self.saved.push(saved.buffer.as_slice()[..saved.len].to_vec());
        callbacks.free_buffer(saved.buffer);

        self.synced = packed;
        self.frame += 1;
        Ok(())
    }

    fn network_stats(&mut self, _player: PlayerHandle) -> Option<EngineNetworkStats> {
        self.stats
    }

    fn close(&mut self) {
        self.started = false;
        self.begin_sent = false;
        self.inputs.clear();
        self.saved.clear();
        self.synced.clear();
        self.queued_events.clear();
        self.queued_rollback = None;
    }
}
