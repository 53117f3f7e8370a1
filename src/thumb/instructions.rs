//! Field structs for the Thumb instruction classes the scanners search for.
//!
//! Register fields hold raw register numbers. Narrow (16-bit) encodings
//! only address `r0`-`r7`; encoding masks out-of-range fields rather
//! than failing, so callers building instructions keep them in range.

use std::fmt;

use super::immediate::{
    decode_branch_offset, encode_branch_offset, encode_modified_imm, thumb_expand_imm,
};
use super::{condition, emit16, emit32, halfword, halfword_pair, Instruction};

/// Word-aligned PC value seen by a PC-relative load at `offset`.
fn literal_base(offset: usize) -> usize {
    (offset + 4) & !3
}

/// `MOVW Rd, #imm16` (T3), the 16-bit immediate split as `imm4:i:imm3:imm8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Movw {
    pub rd: u8,
    pub imm16: u16,
}

impl Instruction for Movw {
    const NAME: &'static str = "MOVW";

    fn decode(bytes: &[u8]) -> Option<Self> {
        let (hw1, hw2) = halfword_pair(bytes)?;
        if (hw1 & 0xFBF0) != 0xF240 || (hw2 & 0x8000) != 0 {
            return None;
        }
        let imm4 = hw1 & 0xF;
        let i = (hw1 >> 10) & 1;
        let imm3 = (hw2 >> 12) & 0x7;
        let imm8 = hw2 & 0xFF;
        Some(Self {
            rd: ((hw2 >> 8) & 0xF) as u8,
            imm16: (imm4 << 12) | (i << 11) | (imm3 << 8) | imm8,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let imm4 = (self.imm16 >> 12) & 0xF;
        let i = (self.imm16 >> 11) & 1;
        let imm3 = (self.imm16 >> 8) & 0x7;
        let imm8 = self.imm16 & 0xFF;
        let hw1 = 0xF240 | (i << 10) | imm4;
        let hw2 = (imm3 << 12) | (u16::from(self.rd & 0xF) << 8) | imm8;
        emit32(hw1, hw2)
    }

    fn size(&self) -> usize {
        4
    }

    fn filter_value(&self) -> u32 {
        u32::from(self.imm16)
    }
}

impl fmt::Display for Movw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MOVW R{}, #0x{:X}", self.rd, self.imm16)
    }
}

/// `MOV.W Rd, #<modified immediate>` (T2).
///
/// The scanner filter compares the raw 12-bit field, so `0x3FF` selects
/// `MOV.W Rd, #0xFFFFFFFF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovWide {
    pub rd: u8,
    pub setflags: bool,
    pub imm12: u16,
}

impl MovWide {
    /// Build from an immediate value, if it is representable.
    pub fn with_value(rd: u8, value: u32) -> Option<Self> {
        encode_modified_imm(value).map(|imm12| Self {
            rd,
            setflags: false,
            imm12,
        })
    }

    /// The expanded 32-bit immediate.
    pub fn value(&self) -> u32 {
        thumb_expand_imm(self.imm12)
    }
}

impl Instruction for MovWide {
    const NAME: &'static str = "MOV.W";

    fn decode(bytes: &[u8]) -> Option<Self> {
        let (hw1, hw2) = halfword_pair(bytes)?;
        if (hw1 & 0xFBEF) != 0xF04F || (hw2 & 0x8000) != 0 {
            return None;
        }
        let i = (hw1 >> 10) & 1;
        let imm3 = (hw2 >> 12) & 0x7;
        Some(Self {
            rd: ((hw2 >> 8) & 0xF) as u8,
            setflags: (hw1 >> 4) & 1 != 0,
            imm12: (i << 11) | (imm3 << 8) | (hw2 & 0xFF),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let i = (self.imm12 >> 11) & 1;
        let imm3 = (self.imm12 >> 8) & 0x7;
        let hw1 = 0xF04F | (i << 10) | (u16::from(self.setflags) << 4);
        let hw2 = (imm3 << 12) | (u16::from(self.rd & 0xF) << 8) | (self.imm12 & 0xFF);
        emit32(hw1, hw2)
    }

    fn size(&self) -> usize {
        4
    }

    fn filter_value(&self) -> u32 {
        u32::from(self.imm12)
    }
}

impl fmt::Display for MovWide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = if self.setflags { "S" } else { "" };
        write!(f, "MOV{}.W R{}, #0x{:X}", s, self.rd, self.value())
    }
}

/// `MOVS Rd, #imm8` (T1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Movs {
    pub rd: u8,
    pub imm8: u8,
}

impl Instruction for Movs {
    const NAME: &'static str = "MOVS";

    fn decode(bytes: &[u8]) -> Option<Self> {
        let hw = halfword(bytes)?;
        if (hw & 0xF800) != 0x2000 {
            return None;
        }
        Some(Self {
            rd: ((hw >> 8) & 0x7) as u8,
            imm8: (hw & 0xFF) as u8,
        })
    }

    fn encode(&self) -> Vec<u8> {
        emit16(0x2000 | (u16::from(self.rd & 0x7) << 8) | u16::from(self.imm8))
    }

    fn size(&self) -> usize {
        2
    }

    fn filter_value(&self) -> u32 {
        u32::from(self.imm8)
    }
}

impl fmt::Display for Movs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MOVS R{}, #{}", self.rd, self.imm8)
    }
}

/// `LDR Rt, [PC, #imm8 * 4]` (T1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdrLiteral {
    pub rt: u8,
    /// Word index into the literal pool, relative to `Align(PC, 4)`
    pub imm8: u8,
}

impl LdrLiteral {
    /// File offset of the pool entry loaded by this instruction at `offset`.
    pub fn pool_offset(&self, offset: usize) -> usize {
        literal_base(offset) + usize::from(self.imm8) * 4
    }

    /// Build the load at `offset` that reads the pool entry at `pool`.
    pub fn to_pool(rt: u8, offset: usize, pool: usize) -> Option<Self> {
        let delta = pool.checked_sub(literal_base(offset))?;
        if delta % 4 != 0 {
            return None;
        }
        let imm8 = u8::try_from(delta / 4).ok()?;
        Some(Self { rt, imm8 })
    }
}

impl Instruction for LdrLiteral {
    const NAME: &'static str = "LDR literal";

    fn decode(bytes: &[u8]) -> Option<Self> {
        let hw = halfword(bytes)?;
        if (hw & 0xF800) != 0x4800 {
            return None;
        }
        Some(Self {
            rt: ((hw >> 8) & 0x7) as u8,
            imm8: (hw & 0xFF) as u8,
        })
    }

    fn encode(&self) -> Vec<u8> {
        emit16(0x4800 | (u16::from(self.rt & 0x7) << 8) | u16::from(self.imm8))
    }

    fn size(&self) -> usize {
        2
    }

    fn filter_value(&self) -> u32 {
        u32::from(self.imm8) * 4
    }
}

impl fmt::Display for LdrLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LDR R{}, [PC, #0x{:X}]", self.rt, u32::from(self.imm8) * 4)
    }
}

/// `LDR.W Rt, [PC, #+/-imm12]` (T2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdrWideLiteral {
    pub rt: u8,
    /// `U` bit: the byte offset is added to the base
    pub add: bool,
    pub imm12: u16,
}

impl LdrWideLiteral {
    /// File offset of the pool entry, or `None` if it lies before the image.
    pub fn pool_offset(&self, offset: usize) -> Option<usize> {
        let base = literal_base(offset);
        let imm = usize::from(self.imm12);
        if self.add {
            Some(base + imm)
        } else {
            base.checked_sub(imm)
        }
    }

    /// Build the load at `offset` that reads the pool entry at `pool`.
    pub fn to_pool(rt: u8, offset: usize, pool: usize) -> Option<Self> {
        let base = literal_base(offset);
        let (add, delta) = if pool >= base {
            (true, pool - base)
        } else {
            (false, base - pool)
        };
        let imm12 = u16::try_from(delta).ok().filter(|imm| *imm <= 0xFFF)?;
        Some(Self { rt, add, imm12 })
    }
}

impl Instruction for LdrWideLiteral {
    const NAME: &'static str = "LDR.W literal";

    fn decode(bytes: &[u8]) -> Option<Self> {
        let (hw1, hw2) = halfword_pair(bytes)?;
        if (hw1 & 0xFF7F) != 0xF85F {
            return None;
        }
        Some(Self {
            rt: (hw2 >> 12) as u8,
            add: hw1 & 0x80 != 0,
            imm12: hw2 & 0xFFF,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let hw1 = 0xF85F | (u16::from(self.add) << 7);
        let hw2 = (u16::from(self.rt & 0xF) << 12) | (self.imm12 & 0xFFF);
        emit32(hw1, hw2)
    }

    fn size(&self) -> usize {
        4
    }

    fn filter_value(&self) -> u32 {
        u32::from(self.imm12)
    }
}

impl fmt::Display for LdrWideLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.add { "" } else { "-" };
        write!(f, "LDR.W R{}, [PC, #{}0x{:X}]", self.rt, sign, self.imm12)
    }
}

/// Either form of PC-relative literal load; the wide form is tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralLoad {
    Narrow(LdrLiteral),
    Wide(LdrWideLiteral),
}

impl LiteralLoad {
    /// File offset of the pool entry this load reads when placed at `offset`.
    pub fn pool_offset(&self, offset: usize) -> Option<usize> {
        match self {
            LiteralLoad::Narrow(ldr) => Some(ldr.pool_offset(offset)),
            LiteralLoad::Wide(ldr) => ldr.pool_offset(offset),
        }
    }

    /// Destination register.
    pub fn rt(&self) -> u8 {
        match self {
            LiteralLoad::Narrow(ldr) => ldr.rt,
            LiteralLoad::Wide(ldr) => ldr.rt,
        }
    }

    /// The same load pointed one pool word earlier.
    pub fn previous_word(&self) -> Option<Self> {
        match *self {
            LiteralLoad::Narrow(ldr) => ldr.imm8.checked_sub(1).map(|imm8| {
                LiteralLoad::Narrow(LdrLiteral { imm8, ..ldr })
            }),
            LiteralLoad::Wide(ldr) => {
                let moved = if ldr.add {
                    ldr.imm12.checked_sub(4).map(|imm12| LdrWideLiteral { imm12, ..ldr })
                } else {
                    Some(ldr.imm12 + 4)
                        .filter(|imm12| *imm12 <= 0xFFF)
                        .map(|imm12| LdrWideLiteral { imm12, ..ldr })
                };
                moved.map(LiteralLoad::Wide)
            }
        }
    }
}

impl Instruction for LiteralLoad {
    const NAME: &'static str = "LDR/LDR.W literal";

    fn decode(bytes: &[u8]) -> Option<Self> {
        LdrWideLiteral::decode(bytes)
            .map(LiteralLoad::Wide)
            .or_else(|| LdrLiteral::decode(bytes).map(LiteralLoad::Narrow))
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            LiteralLoad::Narrow(ldr) => ldr.encode(),
            LiteralLoad::Wide(ldr) => ldr.encode(),
        }
    }

    fn size(&self) -> usize {
        match self {
            LiteralLoad::Narrow(_) => 2,
            LiteralLoad::Wide(_) => 4,
        }
    }

    fn filter_value(&self) -> u32 {
        match self {
            LiteralLoad::Narrow(ldr) => ldr.filter_value(),
            LiteralLoad::Wide(ldr) => ldr.filter_value(),
        }
    }
}

impl fmt::Display for LiteralLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralLoad::Narrow(ldr) => fmt::Display::fmt(ldr, f),
            LiteralLoad::Wide(ldr) => fmt::Display::fmt(ldr, f),
        }
    }
}

/// `LDRB Rt, [Rn, Rm]` (T1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdrbRegister {
    pub rt: u8,
    pub rn: u8,
    pub rm: u8,
}

impl Instruction for LdrbRegister {
    const NAME: &'static str = "LDRB";

    fn decode(bytes: &[u8]) -> Option<Self> {
        let hw = halfword(bytes)?;
        if (hw & 0xFE00) != 0x5C00 {
            return None;
        }
        Some(Self {
            rt: (hw & 0x7) as u8,
            rn: ((hw >> 3) & 0x7) as u8,
            rm: ((hw >> 6) & 0x7) as u8,
        })
    }

    fn encode(&self) -> Vec<u8> {
        emit16(
            0x5C00
                | (u16::from(self.rm & 0x7) << 6)
                | (u16::from(self.rn & 0x7) << 3)
                | u16::from(self.rt & 0x7),
        )
    }

    fn size(&self) -> usize {
        2
    }

    fn filter_value(&self) -> u32 {
        u32::from(self.rm)
    }
}

impl fmt::Display for LdrbRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LDRB R{}, [R{}, R{}]", self.rt, self.rn, self.rm)
    }
}

/// `CMP Rn, #imm8` (T1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmpImm {
    pub rn: u8,
    pub imm8: u8,
}

impl Instruction for CmpImm {
    const NAME: &'static str = "CMP";

    fn decode(bytes: &[u8]) -> Option<Self> {
        let hw = halfword(bytes)?;
        if (hw & 0xF800) != 0x2800 {
            return None;
        }
        Some(Self {
            rn: ((hw >> 8) & 0x7) as u8,
            imm8: (hw & 0xFF) as u8,
        })
    }

    fn encode(&self) -> Vec<u8> {
        emit16(0x2800 | (u16::from(self.rn & 0x7) << 8) | u16::from(self.imm8))
    }

    fn size(&self) -> usize {
        2
    }

    fn filter_value(&self) -> u32 {
        u32::from(self.imm8)
    }
}

impl fmt::Display for CmpImm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CMP R{}, #0x{:X}", self.rn, self.imm8)
    }
}

/// `IT{x{y{z}}} <firstcond>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct It {
    pub firstcond: u8,
    /// Non-zero 4-bit mask; its lowest set bit terminates the block
    pub mask: u8,
}

impl It {
    /// Number of instructions the block makes conditional (1-4).
    pub fn block_len(&self) -> usize {
        4 - (self.mask & 0xF).trailing_zeros().min(3) as usize
    }
}

impl Instruction for It {
    const NAME: &'static str = "IT";

    fn decode(bytes: &[u8]) -> Option<Self> {
        let hw = halfword(bytes)?;
        let firstcond = ((hw >> 4) & 0xF) as u8;
        if (hw & 0xFF00) != 0xBF00 || hw & 0xF == 0 || firstcond == 0xF {
            return None;
        }
        Some(Self {
            firstcond,
            mask: (hw & 0xF) as u8,
        })
    }

    fn encode(&self) -> Vec<u8> {
        emit16(0xBF00 | (u16::from(self.firstcond & 0xF) << 4) | u16::from(self.mask & 0xF))
    }

    fn size(&self) -> usize {
        2
    }

    fn filter_value(&self) -> u32 {
        u32::from(self.firstcond)
    }
}

impl fmt::Display for It {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut suffix = String::new();
        let base = self.firstcond & 1;
        for bit in (4 - self.block_len() + 1..4).rev() {
            let same = (self.mask >> bit) & 1 == base;
            suffix.push(if same { 'T' } else { 'E' });
        }
        write!(f, "IT{} {}", suffix, condition::name(self.firstcond))
    }
}

/// `NEGS Rd, Rn` (`RSBS Rd, Rn, #0`, T1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negs {
    pub rd: u8,
    pub rn: u8,
}

impl Instruction for Negs {
    const NAME: &'static str = "NEGS";

    fn decode(bytes: &[u8]) -> Option<Self> {
        let hw = halfword(bytes)?;
        if (hw & 0xFFC0) != 0x4240 {
            return None;
        }
        Some(Self {
            rd: (hw & 0x7) as u8,
            rn: ((hw >> 3) & 0x7) as u8,
        })
    }

    fn encode(&self) -> Vec<u8> {
        emit16(0x4240 | (u16::from(self.rn & 0x7) << 3) | u16::from(self.rd & 0x7))
    }

    fn size(&self) -> usize {
        2
    }

    /// The implicit `#0` of `RSBS`.
    fn filter_value(&self) -> u32 {
        0
    }
}

impl fmt::Display for Negs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NEGS R{}, R{}", self.rd, self.rn)
    }
}

/// `BL <label>` (T1), 32-bit with a split, sign-extended offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bl {
    /// Offset relative to the instruction's PC (address + 4)
    pub imm32: i32,
}

impl Bl {
    /// Build the `BL` at `from` that calls `to`.
    pub fn to(from: usize, to: usize) -> Option<Self> {
        let imm32 = i64::try_from(to).ok()? - i64::try_from(from).ok()? - 4;
        let imm32 = i32::try_from(imm32).ok()?;
        encode_branch_offset(imm32).map(|_| Self { imm32 })
    }

    /// Distance from the `BL` itself to its destination.
    pub fn displacement(&self) -> i64 {
        i64::from(self.imm32) + 4
    }

    /// Destination offset of the `BL` at `offset`, if it lands inside `0..`.
    pub fn target(&self, offset: usize) -> Option<usize> {
        let dest = i64::try_from(offset).ok()? + self.displacement();
        usize::try_from(dest).ok()
    }
}

impl Instruction for Bl {
    const NAME: &'static str = "BL";

    fn decode(bytes: &[u8]) -> Option<Self> {
        let (hw1, hw2) = halfword_pair(bytes)?;
        if (hw1 & 0xF800) != 0xF000 || (hw2 & 0xD000) != 0xD000 {
            return None;
        }
        Some(Self {
            imm32: decode_branch_offset(hw1, hw2),
        })
    }

    fn encode(&self) -> Vec<u8> {
        // Out-of-range offsets cannot come from `decode` or `Bl::to`.
        let (hw1, hw2) = encode_branch_offset(self.imm32).unwrap_or((0xF000, 0xF800));
        emit32(hw1, hw2)
    }

    fn size(&self) -> usize {
        4
    }

    fn filter_value(&self) -> u32 {
        self.imm32 as u32
    }
}

impl fmt::Display for Bl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BL #{:+}", self.displacement())
    }
}
