//! Split-immediate helpers for Thumb-2 encodings.

/// Expand a 12-bit Thumb-2 modified immediate (`i:imm3:imm8`) to its value.
pub fn thumb_expand_imm(imm12: u16) -> u32 {
    let imm8 = u32::from(imm12 & 0xFF);
    if imm12 & 0xC00 == 0 {
        match (imm12 >> 8) & 0x3 {
            0 => imm8,
            1 => (imm8 << 16) | imm8,
            2 => (imm8 << 24) | (imm8 << 8),
            _ => (imm8 << 24) | (imm8 << 16) | (imm8 << 8) | imm8,
        }
    } else {
        let unrotated = 0x80 | u32::from(imm12 & 0x7F);
        unrotated.rotate_right(u32::from(imm12 >> 7))
    }
}

/// Encode a value as a Thumb-2 modified immediate, if representable.
pub fn encode_modified_imm(val: u32) -> Option<u16> {
    if val <= 255 {
        return Some(val as u16);
    }
    // 0x00XY00XY
    if (val >> 16) == (val & 0xFFFF) && (val & 0xFF00) == 0 {
        return Some(0x100 | (val & 0xFF) as u16);
    }
    // 0xXY00XY00
    if (val >> 16) == (val & 0xFFFF) && (val & 0xFF) == 0 {
        return Some(0x200 | ((val >> 8) & 0xFF) as u16);
    }
    // 0xXYXYXYXY
    if (val >> 24) == ((val >> 16) & 0xFF)
        && (val >> 24) == ((val >> 8) & 0xFF)
        && (val >> 24) == (val & 0xFF)
    {
        return Some(0x300 | (val & 0xFF) as u16);
    }
    // Rotated 8-bit value with the top bit set
    for rot in 8..=31_u32 {
        let unrotated = val.rotate_left(rot);
        if unrotated <= 255 && (unrotated & 0x80) != 0 {
            return Some(((rot as u16) << 7) | (unrotated as u16 & 0x7F));
        }
    }
    None
}

/// Decode the signed byte offset of a Thumb-2 `BL` from its two halfwords.
///
/// `imm32 = SignExtend(S:I1:I2:imm10:imm11:0)` with `I1 = NOT(J1 XOR S)` and
/// `I2 = NOT(J2 XOR S)`.
pub fn decode_branch_offset(hw1: u16, hw2: u16) -> i32 {
    let s = u32::from((hw1 >> 10) & 1);
    let imm10 = u32::from(hw1 & 0x3FF);
    let j1 = u32::from((hw2 >> 13) & 1);
    let j2 = u32::from((hw2 >> 11) & 1);
    let imm11 = u32::from(hw2 & 0x7FF);
    let i1 = !(j1 ^ s) & 1;
    let i2 = !(j2 ^ s) & 1;

    let imm = (s << 24) | (i1 << 23) | (i2 << 22) | (imm10 << 12) | (imm11 << 1);
    ((imm << 7) as i32) >> 7
}

/// Split a signed, even byte offset into `BL` halfwords.
///
/// Returns `None` for odd offsets or offsets outside +/-16 MiB.
pub fn encode_branch_offset(offset: i32) -> Option<(u16, u16)> {
    if offset & 1 != 0 || !(-(1 << 24)..(1 << 24)).contains(&offset) {
        return None;
    }
    let imm = offset as u32;
    let s = (imm >> 24) & 1;
    let i1 = (imm >> 23) & 1;
    let i2 = (imm >> 22) & 1;
    let j1 = !(i1 ^ s) & 1;
    let j2 = !(i2 ^ s) & 1;
    let imm10 = (imm >> 12) & 0x3FF;
    let imm11 = (imm >> 1) & 0x7FF;

    let hw1 = 0xF000 | (s << 10) | imm10;
    let hw2 = 0xD000 | (j1 << 13) | (j2 << 11) | imm11;
    Some((hw1 as u16, hw2 as u16))
}
