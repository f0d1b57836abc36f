//! Per-player input wire format
//!
//! Each player contributes a fixed 32-byte block per frame. The block is POD
//! so the transport engine can serialize it directly; the compact bit-packed
//! button layout is translated to and from the emulated system's native
//! controller convention at the frame boundary.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::emulator::ControllerState;

/// Bytes per player per frame on the wire
pub const INPUT_BLOCK_BYTES: usize = 32;

bitflags::bitflags! {
    /// Button bitfield carried in [`InputBlock::buttons`] (14 meaningful bits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u16 {
        const A          = 1 << 0;
        const B          = 1 << 1;
        const Z          = 1 << 2;
        const START      = 1 << 3;
        const DPAD_UP    = 1 << 4;
        const DPAD_DOWN  = 1 << 5;
        const DPAD_LEFT  = 1 << 6;
        const DPAD_RIGHT = 1 << 7;
        const SHOULDER_L = 1 << 8;
        const SHOULDER_R = 1 << 9;
        const C_UP       = 1 << 10;
        const C_DOWN     = 1 << 11;
        const C_LEFT     = 1 << 12;
        const C_RIGHT    = 1 << 13;
    }
}

// Native controller bit positions used by the emulated system's input API.
mod native {
    pub const DPAD_RIGHT: u32 = 0x0001;
    pub const DPAD_LEFT: u32 = 0x0002;
    pub const DPAD_DOWN: u32 = 0x0004;
    pub const DPAD_UP: u32 = 0x0008;
    pub const START: u32 = 0x0010;
    pub const Z: u32 = 0x0020;
    pub const B: u32 = 0x0040;
    pub const A: u32 = 0x0080;
    pub const SHOULDER_R: u32 = 0x0100;
    pub const SHOULDER_L: u32 = 0x0200;
    pub const C_RIGHT: u32 = 0x0400;
    pub const C_LEFT: u32 = 0x0800;
    pub const C_DOWN: u32 = 0x1000;
    pub const C_UP: u32 = 0x2000;
}

/// Wire bit <-> native bit pairs, one entry per meaningful button
const BUTTON_MAP: [(Buttons, u32); 14] = [
    (Buttons::A, native::A),
    (Buttons::B, native::B),
    (Buttons::Z, native::Z),
    (Buttons::START, native::START),
    (Buttons::DPAD_UP, native::DPAD_UP),
    (Buttons::DPAD_DOWN, native::DPAD_DOWN),
    (Buttons::DPAD_LEFT, native::DPAD_LEFT),
    (Buttons::DPAD_RIGHT, native::DPAD_RIGHT),
    (Buttons::SHOULDER_L, native::SHOULDER_L),
    (Buttons::SHOULDER_R, native::SHOULDER_R),
    (Buttons::C_UP, native::C_UP),
    (Buttons::C_DOWN, native::C_DOWN),
    (Buttons::C_LEFT, native::C_LEFT),
    (Buttons::C_RIGHT, native::C_RIGHT),
];

/// Fixed 32-byte per-player input record
///
/// Only the first 8 bytes carry data; the remainder is reserved padding so
/// the wire size stays stable if the layout grows. The transport engine
/// requires inputs to be POD and serde-serializable for network transfer.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable, Serialize, Deserialize,
)]
pub struct InputBlock {
    /// Digital buttons, see [`Buttons`]
    pub buttons: u16,
    /// Analog stick X, -128..=127
    pub stick_x: i8,
    /// Analog stick Y, -128..=127
    pub stick_y: i8,
    /// Right trigger value
    pub trigger_r: u8,
    /// Left trigger value
    pub trigger_l: u8,
    /// Reserved for future use
    pub reserved: [u8; 2],
    _pad: [u8; 24],
}

impl InputBlock {
    /// Build a block from the emulated system's native controller state
    pub fn from_native(state: &ControllerState) -> Self {
        let mut buttons = Buttons::empty();
        for (wire, native_bit) in BUTTON_MAP {
            if state.buttons & native_bit != 0 {
                buttons |= wire;
            }
        }

        Self {
            buttons: buttons.bits(),
            stick_x: state.stick_x,
            stick_y: state.stick_y,
            trigger_r: if state.buttons & native::SHOULDER_R != 0 { 255 } else { 0 },
            trigger_l: if state.buttons & native::SHOULDER_L != 0 { 255 } else { 0 },
            reserved: [0; 2],
            _pad: [0; 24],
        }
    }

    /// Translate back to the native controller convention
    pub fn to_native(&self) -> ControllerState {
        let wire = Buttons::from_bits_truncate(self.buttons);
        let mut buttons = 0u32;
        for (wire_bit, native_bit) in BUTTON_MAP {
            if wire.contains(wire_bit) {
                buttons |= native_bit;
            }
        }

        ControllerState {
            buttons,
            stick_x: self.stick_x,
            stick_y: self.stick_y,
        }
    }

    /// Read a block from its 32-byte wire representation
    ///
    /// Returns `None` when `bytes` is not exactly [`INPUT_BLOCK_BYTES`] long.
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != INPUT_BLOCK_BYTES {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// View the block as wire bytes
    pub fn as_wire(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_block_is_32_bytes() {
        assert_eq!(std::mem::size_of::<InputBlock>(), INPUT_BLOCK_BYTES);
    }

    #[test]
    fn test_native_round_trip() {
        let state = ControllerState {
            buttons: native::A | native::Z | native::DPAD_LEFT | native::C_UP,
            stick_x: -64,
            stick_y: 127,
        };
        let block = InputBlock::from_native(&state);
        let back = block.to_native();
        assert_eq!(back.buttons, state.buttons);
        assert_eq!(back.stick_x, -64);
        assert_eq!(back.stick_y, 127);
    }

    #[test]
    fn test_shoulder_buttons_drive_triggers() {
        let state = ControllerState {
            buttons: native::SHOULDER_L,
            stick_x: 0,
            stick_y: 0,
        };
        let block = InputBlock::from_native(&state);
        assert_eq!(block.trigger_l, 255);
        assert_eq!(block.trigger_r, 0);
    }

    #[test]
    fn test_wire_round_trip() {
        let state = ControllerState {
            buttons: native::START | native::B,
            stick_x: 10,
            stick_y: -20,
        };
        let block = InputBlock::from_native(&state);
        let bytes = block.as_wire();
        assert_eq!(bytes.len(), INPUT_BLOCK_BYTES);
        let back = InputBlock::from_wire(bytes).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_from_wire_rejects_wrong_length() {
        assert!(InputBlock::from_wire(&[0u8; 16]).is_none());
        assert!(InputBlock::from_wire(&[0u8; 33]).is_none());
    }

    #[test]
    fn test_unknown_wire_bits_dropped() {
        let mut block = InputBlock::default();
        block.buttons = 0xFFFF; // two bits beyond the meaningful 14
        let native = block.to_native();
        let back = InputBlock::from_native(&native);
        assert_eq!(back.buttons, Buttons::all().bits());
    }
}
