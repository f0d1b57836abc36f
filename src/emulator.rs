//! Emulated-system collaborator
//!
//! The wrapped emulator is a black box to this crate: it exposes state
//! save/restore, virtual controller access, and a single-frame step. The
//! [`EmulatedSystem`] trait is the seam that lets tests substitute a fake
//! system for the real core.

use anyhow::Result;

/// Native controller state in the emulated system's own convention
///
/// `buttons` uses the system's bit layout, which differs from the wire
/// layout in [`crate::input::InputBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerState {
    /// Button bits in the system's native positions
    pub buttons: u32,
    /// Analog stick X, -128..=127
    pub stick_x: i8,
    /// Analog stick Y, -128..=127
    pub stick_y: i8,
}

/// Interface to the wrapped emulator core
pub trait EmulatedSystem {
    /// Serialize the complete simulation state into `buf`
    ///
    /// Returns the exact number of bytes written. The implementation must
    /// report the true length; the codec trusts it when sizing the
    /// snapshot payload.
    fn save_state(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Restore the complete simulation state from `data`
    fn load_state(&mut self, data: &[u8]) -> Result<()>;

    /// Whether a controller is plugged into the given port (0-based)
    fn controller_connected(&self, port: usize) -> bool;

    /// Read the current controller state for a port, if available
    fn read_controller(&mut self, port: usize) -> Option<ControllerState>;

    /// Drive a virtual controller with the given state
    ///
    /// Returns false when the port rejects the input.
    fn set_controller(&mut self, port: usize, state: &ControllerState) -> bool;

    /// Current deterministic RNG seed of the simulation
    ///
    /// Recorded in every snapshot header so a restored state can be checked
    /// for determinism drift.
    fn determinism_seed(&mut self) -> u32;

    /// Advance the simulation by exactly one frame
    ///
    /// Invoked by the transport engine while re-simulating rolled-back
    /// frames.
    fn step(&mut self) -> Result<()>;
}
