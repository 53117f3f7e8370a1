//! Directed linear scanners over a Thumb instruction stream.
//!
//! Every scanner walks the buffer in 2-byte steps, tries to decode one
//! instruction class at each position and counts matches:
//!
//! - `start` is the first position tried (forward) or the bound the walk
//!   starts below (backward);
//! - `skip` ignores the first N matches and returns the (N+1)-th;
//! - the optional filter must equal the decoded immediate (see
//!   [`Instruction::filter_value`]).
//!
//! Callers bound a search to a window by passing a sub-slice; offsets in
//! the returned [`Match`] are always relative to the slice start, which is
//! the image start for every `&data[..end]` window.

use memchr::memmem;

use crate::thumb::{
    is_return, thumb_instruction_length, Bl, CmpImm, Instruction, It, LdrLiteral, LdrWideLiteral,
    LdrbRegister, LiteralLoad, MovWide, Movs, Movw, Negs,
};

/// A decoded instruction and the offset it was found at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<I> {
    pub insn: I,
    pub offset: usize,
}

impl<I: Instruction> Match<I> {
    /// Offset just past the matched instruction.
    pub fn end(&self) -> usize {
        self.offset + self.insn.size()
    }
}

impl Match<Bl> {
    /// Offset the matched call lands on.
    pub fn target(&self) -> Option<usize> {
        self.insn.target(self.offset)
    }
}

/// Loads that read a literal pool entry.
pub trait PoolLoad: Instruction {
    /// File offset of the pool entry read by this load at `offset`.
    fn pool(&self, offset: usize) -> Option<usize>;
}

impl PoolLoad for LdrLiteral {
    fn pool(&self, offset: usize) -> Option<usize> {
        Some(self.pool_offset(offset))
    }
}

impl PoolLoad for LdrWideLiteral {
    fn pool(&self, offset: usize) -> Option<usize> {
        self.pool_offset(offset)
    }
}

impl PoolLoad for LiteralLoad {
    fn pool(&self, offset: usize) -> Option<usize> {
        self.pool_offset(offset)
    }
}

/// Walk forward from `start`, returning the (skip+1)-th position accepted by `accept`.
pub fn scan_forward<I, F>(data: &[u8], start: usize, skip: usize, accept: F) -> Option<Match<I>>
where
    I: Instruction,
    F: Fn(&I, usize) -> bool,
{
    let mut remaining = skip;
    for offset in (start..data.len()).step_by(2) {
        let Some(insn) = I::decode(&data[offset..]) else {
            continue;
        };
        if !accept(&insn, offset) {
            continue;
        }
        if remaining == 0 {
            return Some(Match { insn, offset });
        }
        remaining -= 1;
    }
    None
}

/// Walk backward from `start - 2` down to `floor` inclusive.
pub fn scan_backward<I, F>(
    data: &[u8],
    start: usize,
    floor: usize,
    skip: usize,
    accept: F,
) -> Option<Match<I>>
where
    I: Instruction,
    F: Fn(&I, usize) -> bool,
{
    let mut remaining = skip;
    let mut offset = start.min(data.len());
    while let Some(prev) = offset.checked_sub(2) {
        if prev < floor {
            break;
        }
        offset = prev;
        let Some(insn) = I::decode(&data[offset..]) else {
            continue;
        };
        if !accept(&insn, offset) {
            continue;
        }
        if remaining == 0 {
            return Some(Match { insn, offset });
        }
        remaining -= 1;
    }
    None
}

fn value_matches<I: Instruction>(insn: &I, filter: Option<u32>) -> bool {
    filter.map_or(true, |value| insn.filter_value() == value)
}

/// Next instruction of class `I`, optionally filtered on its immediate.
pub fn find_next<I: Instruction>(
    data: &[u8],
    start: usize,
    skip: usize,
    filter: Option<u32>,
) -> Option<Match<I>> {
    scan_forward(data, start, skip, |insn: &I, _| value_matches(insn, filter))
}

/// Nearest preceding instruction of class `I` no lower than `floor`.
pub fn find_prev<I: Instruction>(
    data: &[u8],
    start: usize,
    floor: usize,
    skip: usize,
    filter: Option<u32>,
) -> Option<Match<I>> {
    scan_backward(data, start, floor, skip, |insn: &I, _| {
        value_matches(insn, filter)
    })
}

/// Whether the pool entry read by `insn` at `offset` holds exactly `target`.
fn pool_holds<L: PoolLoad>(data: &[u8], insn: &L, offset: usize, target: &[u8]) -> bool {
    insn.pool(offset)
        .and_then(|pool| data.get(pool..pool.checked_add(target.len())?))
        .map_or(false, |stored| stored == target)
}

/// Next literal load of class `L` whose pool entry holds `target`.
///
/// `target` is the literal as stored: a reversed 4-character tag or a
/// little-endian absolute address.
pub fn find_next_literal<L: PoolLoad>(
    data: &[u8],
    start: usize,
    skip: usize,
    target: &[u8],
) -> Option<Match<L>> {
    scan_forward(data, start, skip, |insn: &L, offset| {
        pool_holds(data, insn, offset, target)
    })
}

/// Nearest preceding literal load of class `L`, optionally requiring its pool entry.
pub fn find_prev_literal<L: PoolLoad>(
    data: &[u8],
    start: usize,
    floor: usize,
    skip: usize,
    target: Option<&[u8]>,
) -> Option<Match<L>> {
    scan_backward(data, start, floor, skip, |insn: &L, offset| {
        target.map_or(true, |target| pool_holds(data, insn, offset, target))
    })
}

pub fn find_next_movw(data: &[u8], start: usize, skip: usize, imm16: Option<u16>) -> Option<Match<Movw>> {
    find_next(data, start, skip, imm16.map(u32::from))
}

/// `imm12` is the raw modified-immediate field (`0x3FF` for `#0xFFFFFFFF`).
pub fn find_next_mov_w(
    data: &[u8],
    start: usize,
    skip: usize,
    imm12: Option<u16>,
) -> Option<Match<MovWide>> {
    find_next(data, start, skip, imm12.map(u32::from))
}

pub fn find_next_movs(data: &[u8], start: usize, skip: usize, imm8: Option<u8>) -> Option<Match<Movs>> {
    find_next(data, start, skip, imm8.map(u32::from))
}

pub fn find_next_ldrb(data: &[u8], start: usize, skip: usize) -> Option<Match<LdrbRegister>> {
    find_next(data, start, skip, None)
}

pub fn find_next_cmp(data: &[u8], start: usize, skip: usize, imm8: Option<u8>) -> Option<Match<CmpImm>> {
    find_next(data, start, skip, imm8.map(u32::from))
}

pub fn find_next_it(data: &[u8], start: usize, skip: usize) -> Option<Match<It>> {
    find_next(data, start, skip, None)
}

pub fn find_next_negs(data: &[u8], start: usize, skip: usize) -> Option<Match<Negs>> {
    find_next(data, start, skip, None)
}

pub fn find_next_bl(data: &[u8], start: usize, skip: usize) -> Option<Match<Bl>> {
    find_next(data, start, skip, None)
}

/// Next `BL` at or after `start` that precedes any aligned copy of `applied`.
///
/// `applied` is the replacement a patch writes over a call, so a call that
/// has already been rewritten ends the search instead of the scan moving on
/// to the following one.
pub fn find_next_unpatched_bl(
    data: &[u8],
    start: usize,
    skip: usize,
    applied: &[u8],
) -> Option<Match<Bl>> {
    let end = (start..data.len())
        .step_by(2)
        .find(|&offset| data[offset..].starts_with(applied))
        .unwrap_or(data.len());
    find_next_bl(&data[..end], start, skip)
}

pub fn find_next_ldr_literal(
    data: &[u8],
    start: usize,
    skip: usize,
    target: &[u8],
) -> Option<Match<LdrLiteral>> {
    find_next_literal(data, start, skip, target)
}

pub fn find_next_ldr_w_literal(
    data: &[u8],
    start: usize,
    skip: usize,
    target: &[u8],
) -> Option<Match<LdrWideLiteral>> {
    find_next_literal(data, start, skip, target)
}

/// Next `LDR.W` or `LDR` literal load whose pool entry holds `target`.
pub fn find_next_literal_load(
    data: &[u8],
    start: usize,
    skip: usize,
    target: &[u8],
) -> Option<Match<LiteralLoad>> {
    find_next_literal(data, start, skip, target)
}

pub fn find_prev_bl(data: &[u8], start: usize, floor: usize, skip: usize) -> Option<Match<Bl>> {
    find_prev(data, start, floor, skip, None)
}

pub fn find_prev_cmp(
    data: &[u8],
    start: usize,
    floor: usize,
    skip: usize,
    imm8: Option<u8>,
) -> Option<Match<CmpImm>> {
    find_prev(data, start, floor, skip, imm8.map(u32::from))
}

pub fn find_prev_it(data: &[u8], start: usize, floor: usize, skip: usize) -> Option<Match<It>> {
    find_prev(data, start, floor, skip, None)
}

pub fn find_prev_movs(
    data: &[u8],
    start: usize,
    floor: usize,
    skip: usize,
    imm8: Option<u8>,
) -> Option<Match<Movs>> {
    find_prev(data, start, floor, skip, imm8.map(u32::from))
}

/// Offset just past the first function epilogue at or after `start`.
///
/// Falls back to the end of the buffer when no `BX LR` / `POP {.., pc}` is found.
pub fn function_end(data: &[u8], start: usize) -> usize {
    (start..data.len())
        .step_by(2)
        .find(|&offset| is_return(&data[offset..]))
        .map(|offset| {
            let hw = u16::from_le_bytes([data[offset], data[offset + 1]]);
            (offset + thumb_instruction_length(hw)).min(data.len())
        })
        .unwrap_or(data.len())
}

/// First occurrence of `needle` at or after `start`.
pub fn find_bytes(data: &[u8], start: usize, needle: &[u8]) -> Option<usize> {
    let tail = data.get(start..)?;
    memmem::find(tail, needle).map(|offset| start + offset)
}
