//! Per-frame driver
//!
//! Runs once per displayed frame, before the emulator executes it: capture
//! the local controller, submit it, step the session (which may roll back
//! and re-simulate on `system`), then apply the agreed inputs for the frame
//! the emulator is about to run. A false return means the emulator should
//! pause for this frame and present the previous one again.

use crate::emulator::EmulatedSystem;
use crate::engine::RollbackEngine;
use crate::input::{INPUT_BLOCK_BYTES, InputBlock};
use crate::session::NetplaySession;

/// Drives a [`NetplaySession`] from the emulator's frame callback
pub struct FrameDriver {
    local_port: usize,
    /// Reused between frames to keep the callback allocation-free
    synced: Vec<u8>,
}

impl FrameDriver {
    /// Driver reading local input from controller port 0
    pub fn new() -> Self {
        Self::with_local_port(0)
    }

    /// Driver reading local input from the given controller port
    pub fn with_local_port(local_port: usize) -> Self {
        Self {
            local_port,
            synced: Vec::new(),
        }
    }

    /// Run the netplay work for one displayed frame
    ///
    /// Returns true when the emulator should execute the frame, false when
    /// the frame must be skipped (session still synchronizing, or a failure
    /// recorded in the session's last error).
    pub fn on_frame<E: RollbackEngine>(
        &mut self,
        session: &mut NetplaySession<E>,
        system: &mut dyn EmulatedSystem,
    ) -> bool {
        let state = system.read_controller(self.local_port).unwrap_or_default();
        let input = InputBlock::from_native(&state);

        if !session.add_local_input(&input) {
            return false;
        }
        if !session.advance_frame(system) {
            return false;
        }

        self.synced
            .resize(session.num_players() * INPUT_BLOCK_BYTES, 0);
        if !session.get_synchronized_inputs(&mut self.synced) {
            return false;
        }
        apply_synchronized_inputs(system, &self.synced)
    }
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the virtual controllers with one frame of synchronized inputs
///
/// `inputs` holds one wire block per player; player order maps to
/// controller port order. Used both for the displayed frame and for
/// re-simulated frames during a rollback.
pub fn apply_synchronized_inputs(system: &mut dyn EmulatedSystem, inputs: &[u8]) -> bool {
    if inputs.is_empty() || inputs.len() % INPUT_BLOCK_BYTES != 0 {
        log::error!("synchronized input buffer of {} bytes", inputs.len());
        return false;
    }
    for (port, chunk) in inputs.chunks_exact(INPUT_BLOCK_BYTES).enumerate() {
        // Length is exact per chunks_exact
        let Some(block) = InputBlock::from_wire(chunk) else {
            return false;
        };
        if !system.set_controller(port, &block.to_native()) {
            log::error!("controller port {port} rejected synchronized input");
            return false;
        }
    }
    true
}
