//! Helpers for extracting operand fields from instruction words.
//!
//! An instruction word is two consecutive memory bytes read big-endian.
//! Every function here is total over all 65536 possible words.
use crate::constants::Address;

/// Extract the opcode identity from the highest nibble.
#[inline(always)]
pub fn op_code(word: u16) -> u8 {
    (word >> 12) as u8
}

/// Extract operand X (bits 8-11).
#[inline(always)]
pub fn op_x(word: u16) -> u8 {
    ((word >> 8) & 0xF) as u8
}

/// Extract operand Y (bits 4-7).
#[inline(always)]
pub fn op_y(word: u16) -> u8 {
    ((word >> 4) & 0xF) as u8
}

/// Extract operand N from the lowest nibble.
#[inline(always)]
pub fn op_n(word: u16) -> u8 {
    (word & 0xF) as u8
}

/// Extract operand NN from the low byte.
#[inline(always)]
pub fn op_nn(word: u16) -> u8 {
    (word & 0xFF) as u8
}

/// Extract operand NNN from the low 12 bits.
#[inline(always)]
pub fn op_nnn(word: u16) -> Address {
    word & 0xFFF
}

/// Read the instruction word at `cursor`, big-endian.
///
/// Returns `None` when the two byte positions are not both inside the buffer.
#[inline(always)]
pub fn fetch_word(ram: &[u8], cursor: usize) -> Option<u16> {
    let hi = *ram.get(cursor)?;
    let lo = *ram.get(cursor.checked_add(1)?)?;
    Some(((hi as u16) << 8) | lo as u16)
}
