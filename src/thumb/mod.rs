//! Thumb/Thumb-2 instruction codec.
//!
//! Each supported instruction class is a small field struct that can be
//! decoded from raw little-endian bytes (returning `None` when the fixed
//! opcode bits don't match) and encoded back deterministically. Only the
//! classes the pattern scanners need are modelled; this is not a
//! general-purpose disassembler.

pub mod immediate;
pub mod instructions;

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

pub use instructions::{
    Bl, CmpImm, It, LdrLiteral, LdrWideLiteral, LdrbRegister, LiteralLoad, MovWide, Movs, Movw,
    Negs,
};

/// ARM condition codes, as carried in an `IT` instruction's `firstcond`.
pub mod condition {
    pub const EQ: u8 = 0x0;
    pub const NE: u8 = 0x1;
    pub const AL: u8 = 0xE;

    const NAMES: [&str; 15] = [
        "EQ", "NE", "CS", "CC", "MI", "PL", "VS", "VC", "HI", "LS", "GE", "LT", "GT", "LE", "AL",
    ];

    /// Assembler suffix for a condition code.
    pub fn name(cond: u8) -> &'static str {
        NAMES.get(cond as usize).copied().unwrap_or("NV")
    }
}

/// Thumb instruction patterns.
pub mod patterns {
    pub const BX_LR: u16 = 0x4770; // BX LR (return)
    pub const NOP: u16 = 0xBF00; // NOP.N
    pub const POP_W: u16 = 0xE8BD; // POP.W {reglist}

    /// `MOVS R0, #0` twice: fills a 4-byte call slot so it returns success.
    pub const RETURN_ZERO: [u8; 4] = [0x00, 0x20, 0x00, 0x20];
    /// `MOVS R0, #1` twice: fills a 4-byte call slot so it answers true.
    pub const RETURN_ONE: [u8; 4] = [0x01, 0x20, 0x01, 0x20];

    /// `POP {.., pc}` (16-bit) pops straight into the program counter.
    pub fn is_pop_pc(hw: u16) -> bool {
        (hw & 0xFF00) == 0xBD00
    }
}

/// A Thumb instruction class with a fixed bit template.
pub trait Instruction: Sized + Copy + fmt::Debug + fmt::Display + PartialEq {
    /// Mnemonic used in logs and error messages.
    const NAME: &'static str;

    /// Decode from the start of `bytes`, or `None` if the fixed bits don't
    /// match this class or `bytes` is too short.
    fn decode(bytes: &[u8]) -> Option<Self>;

    /// Encode back to little-endian bytes.
    fn encode(&self) -> Vec<u8>;

    /// Encoded size in bytes (2 or 4).
    fn size(&self) -> usize;

    /// The immediate (or composed immediate field) a scanner filter compares.
    fn filter_value(&self) -> u32;
}

/// Thumb-2 instruction length detection.
pub fn thumb_instruction_length(first_halfword: u16) -> usize {
    let top5 = (first_halfword >> 11) & 0x1F;
    if top5 == 0x1D || top5 == 0x1E || top5 == 0x1F {
        4 // 32-bit Thumb-2 instruction
    } else {
        2 // 16-bit Thumb instruction
    }
}

/// Read the little-endian halfword at the start of `bytes`.
pub fn halfword(bytes: &[u8]) -> Option<u16> {
    bytes.get(..2).map(LittleEndian::read_u16)
}

/// Read both halfwords of a 32-bit Thumb-2 encoding.
pub fn halfword_pair(bytes: &[u8]) -> Option<(u16, u16)> {
    let words = bytes.get(..4)?;
    Some((
        LittleEndian::read_u16(&words[..2]),
        LittleEndian::read_u16(&words[2..]),
    ))
}

pub(crate) fn emit16(hw: u16) -> Vec<u8> {
    hw.to_le_bytes().to_vec()
}

pub(crate) fn emit32(hw1: u16, hw2: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4);
    buf.extend_from_slice(&hw1.to_le_bytes());
    buf.extend_from_slice(&hw2.to_le_bytes());
    buf
}

/// Whether the halfword(s) at the start of `bytes` end a function.
///
/// Recognises `BX LR`, `POP {.., pc}` and `POP.W {.., pc}`.
pub fn is_return(bytes: &[u8]) -> bool {
    let Some(hw) = halfword(bytes) else {
        return false;
    };
    if hw == patterns::BX_LR || patterns::is_pop_pc(hw) {
        return true;
    }
    matches!(halfword_pair(bytes), Some((patterns::POP_W, hw2)) if hw2 & 0x8000 != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumb_length() {
        assert_eq!(thumb_instruction_length(0xBF00), 2); // NOP.N
        assert_eq!(thumb_instruction_length(0xF3AF), 4); // NOP.W prefix
        assert_eq!(thumb_instruction_length(0xF240), 4); // MOVW
    }

    #[test]
    fn test_halfwords() {
        assert_eq!(halfword(&[0x70, 0x47]), Some(0x4770));
        assert_eq!(halfword(&[0x70]), None);
        assert_eq!(halfword_pair(&[0x40, 0xF2, 0x14, 0x40]), Some((0xF240, 0x4014)));
        assert_eq!(halfword_pair(&[0x40, 0xF2, 0x14]), None);
    }

    #[test]
    fn test_is_return() {
        assert!(is_return(&[0x70, 0x47]));
        assert!(is_return(&[0xF0, 0xBD])); // POP {r4-r7, pc}
        assert!(is_return(&[0xBD, 0xE8, 0xF0, 0x8F])); // POP.W {r4-r11, pc}
        assert!(!is_return(&[0xBD, 0xE8, 0xF0, 0x0F])); // POP.W {r4-r11}
        assert!(!is_return(&[0x00, 0xBF]));
    }

    #[test]
    fn test_condition_names() {
        assert_eq!(condition::name(condition::NE), "NE");
        assert_eq!(condition::name(condition::AL), "AL");
        assert_eq!(condition::name(0xF), "NV");
    }
}
