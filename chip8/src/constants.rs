//! Constant values of the Chip-8 architecture.

/// Number of general purpose registers.
pub const REGISTER_COUNT: usize = 0x10; // 16

/// The lower memory space was historically used for the interpreter itself,
/// but is now used for fonts.
pub const MEM_START: usize = 0x200; // 512
pub const MEM_SIZE: usize = 0x1000; // 4096

pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;
pub const DISPLAY_BUFFER_SIZE: usize = DISPLAY_WIDTH * DISPLAY_HEIGHT;

/// Start of the built-in font sprite table in memory.
pub const FONTSET_START: usize = 0x000;

/// Each font glyph is 8 pixels wide and 5 rows tall.
pub const FONTSET_HEIGHT: usize = 5;

/// The built-in hexadecimal font, one glyph per nibble value 0x0-0xF,
/// packed into low memory at [`FONTSET_START`].
pub const FONTSET: [u8; REGISTER_COUNT * FONTSET_HEIGHT] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];

/// Number of keys on the keyboard (0x0-0xF)
pub const KEY_COUNT: usize = 16;

/// Canonical scan order for the `Fx0A` key wait, following the
/// physical layout of the COSMAC VIP keypad row by row.
pub const KEY_SCAN_ORDER: [u8; KEY_COUNT] = [
    0x1, 0x2, 0x3, 0xC, //
    0x4, 0x5, 0x6, 0xD, //
    0x7, 0x8, 0x9, 0xE, //
    0xA, 0x0, 0xB, 0xF, //
];

/// Number of clock cycles in a second that delay and sound timers count down.
pub const TIMER_FREQUENCY: u64 = 60;

/// Instruction rate used when the configured rate is absent or zero.
pub const FALLBACK_CLOCK_HZ: u64 = 700;

/// Number of nanoseconds in a second
#[doc(hidden)]
pub const NANOS_IN_SECOND: u64 = 1_000_000_000;

/// Type for storing the 12-bit memory addresses.
pub type Address = u16;
