//! Keyboard input state.
//!
//! The keypad is the one structure written and read from two independent
//! schedules: the host's input event loop writes key transitions while the
//! interpreter thread polls them. A single mutex covers the whole key map
//! so neither side ever observes a torn update.
use std::sync::{Mutex, MutexGuard};

use crate::constants::{KEY_COUNT, KEY_SCAN_ORDER};

/// Pressed state for the 16 hexadecimal keys.
#[derive(Default)]
pub struct Keypad {
    keys: Mutex<[bool; KEY_COUNT]>,
}

impl Keypad {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, [bool; KEY_COUNT]> {
        // A panic while holding the guard cannot leave the key array in a
        // half-written state, so a poisoned lock is still safe to reuse.
        self.keys.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Overwrite the pressed state for one key code.
    ///
    /// Key ids outside 0x0-0xF are ignored.
    pub fn set_key(&self, key_id: u8, pressed: bool) {
        if (key_id as usize) < KEY_COUNT {
            self.lock()[key_id as usize] = pressed;
        }
    }

    /// Whether the given key is currently held down.
    ///
    /// Key ids outside 0x0-0xF always read as released.
    pub fn is_pressed(&self, key_id: u8) -> bool {
        (key_id as usize) < KEY_COUNT && self.lock()[key_id as usize]
    }

    /// The first pressed key in canonical keypad scan order, if any.
    pub fn first_pressed(&self) -> Option<u8> {
        let keys = self.lock();
        KEY_SCAN_ORDER
            .iter()
            .copied()
            .find(|&key_id| keys[key_id as usize])
    }

    /// Release all keys.
    pub fn clear(&self) {
        self.lock().fill(false);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyCode {
    Key0 = 0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF = 0xF,
}

impl KeyCode {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let key_id = self.as_u8();
        write!(f, "k{key_id:x}")
    }
}

impl From<KeyCode> for u8 {
    fn from(keycode: KeyCode) -> Self {
        keycode.as_u8()
    }
}

impl TryFrom<u8> for KeyCode {
    type Error = InvalidKeyCode;

    fn try_from(key_id: u8) -> Result<Self, Self::Error> {
        match key_id {
            0 => Ok(Self::Key0),
            1 => Ok(Self::Key1),
            2 => Ok(Self::Key2),
            3 => Ok(Self::Key3),
            4 => Ok(Self::Key4),
            5 => Ok(Self::Key5),
            6 => Ok(Self::Key6),
            7 => Ok(Self::Key7),
            8 => Ok(Self::Key8),
            9 => Ok(Self::Key9),
            10 => Ok(Self::KeyA),
            11 => Ok(Self::KeyB),
            12 => Ok(Self::KeyC),
            13 => Ok(Self::KeyD),
            14 => Ok(Self::KeyE),
            15 => Ok(Self::KeyF),
            _ => Err(InvalidKeyCode),
        }
    }
}

#[derive(Debug)]
pub struct InvalidKeyCode;

impl std::error::Error for InvalidKeyCode {}

impl std::fmt::Display for InvalidKeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "keycode must be in range 0 <= keycode < 16")
    }
}
