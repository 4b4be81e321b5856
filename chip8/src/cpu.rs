//! CPU and memory state.
use std::sync::Arc;

use crate::{constants::*, keypad::Keypad, timer::Timers};

/// Core state for a chip8 interpreter.
///
/// One instance owns all virtual hardware for a single emulation session.
/// Nothing lives in ambient global scope, so multiple sessions can run
/// side by side and tests stay deterministic.
pub struct Chip8Cpu {
    // ------------------------------------------------------------------------
    // Registers
    /// Program counter pointing to the current position in the bytecode.
    pub(crate) pc: usize,
    /// General purpose registers for temporary values.
    ///
    /// Register 16 (VF) is used for either the carry flag or borrow switch
    /// depending on opcode.
    pub(crate) registers: [u8; REGISTER_COUNT],
    /// Pointer register used for temporarily storing an address. Since
    /// addresses are 12 bits, only the lowest (rightmost) bits are used.
    pub(crate) address: Address,

    // ------------------------------------------------------------------------
    // Memory
    /// Main memory storage space.
    pub(crate) ram: Box<[u8; MEM_SIZE]>,
    /// Stack of return pointers used for jumping when a routine call finishes.
    pub(crate) stack: Vec<Address>,
    /// Screen buffer that is drawn to.
    pub(crate) display: Box<[bool; DISPLAY_BUFFER_SIZE]>,
    /// Set on any display mutation; reset by the renderer after it
    /// consumes a frame.
    pub(crate) redraw: bool,

    // ------------------------------------------------------------------------
    // Shared devices
    /// Countdown timers, written by the free-running timer driver.
    pub(crate) timers: Arc<Timers>,
    /// Keyboard state, written by the host input loop.
    pub(crate) keypad: Arc<Keypad>,

    // ------------------------------------------------------------------------
    // Dialect switches, fixed at construction
    /// `8xy6`/`8xyE` copy VY into VX before shifting (legacy behaviour).
    pub(crate) shift_uses_vy: bool,
    /// `Bnnn` offsets by V0 (legacy) instead of VX (`Bxnn`).
    pub(crate) jump_uses_v0: bool,
}

impl Chip8Cpu {
    pub fn new(timers: Arc<Timers>, keypad: Arc<Keypad>, shift_uses_vy: bool, jump_uses_v0: bool) -> Self {
        let mut cpu = Self {
            pc: 0,
            registers: [0; REGISTER_COUNT],
            address: 0,

            ram: Box::new([0; MEM_SIZE]),
            stack: Vec::new(),
            display: Box::new([false; DISPLAY_BUFFER_SIZE]),
            redraw: true,

            timers,
            keypad,

            shift_uses_vy,
            jump_uses_v0,
        };
        cpu.load_fontset();
        cpu
    }

    /// Erase the contents of the memory buffers `ram`, `stack` and `display`,
    /// then restore the font table.
    pub(crate) fn clear_memory(&mut self) {
        self.ram.fill(0);
        self.stack.clear();
        self.display.fill(false);
        self.load_fontset();
    }

    fn load_fontset(&mut self) {
        self.ram[FONTSET_START..FONTSET_START + FONTSET.len()].copy_from_slice(&FONTSET);
    }

    pub(crate) fn clear_display(&mut self) {
        self.display.fill(false);
        self.redraw = true;
    }
}
