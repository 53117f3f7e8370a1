//! Property-based tests using proptest.
//!
//! Codec laws for every instruction class the scanners search for, plus
//! the skip-count contract of the scanners and the offset/address mapping.

use iboot_patcher::address::AddressSpace;
use iboot_patcher::scanner::{find_next_cmp, find_prev_cmp};
use iboot_patcher::thumb::{
    patterns, thumb_instruction_length, Bl, CmpImm, Instruction, It, LdrLiteral, LdrWideLiteral,
    LdrbRegister, LiteralLoad, MovWide, Movs, Movw, Negs,
};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

fn round_trips<I: Instruction>(insn: I) -> Result<(), TestCaseError> {
    let bytes = insn.encode();
    prop_assert_eq!(bytes.len(), insn.size());
    let first = u16::from_le_bytes([bytes[0], bytes[1]]);
    prop_assert_eq!(thumb_instruction_length(first), insn.size());
    prop_assert_eq!(I::decode(&bytes), Some(insn));
    Ok(())
}

fn nop_buffer(len: usize) -> Vec<u8> {
    patterns::NOP.to_le_bytes().repeat(len / 2)
}

// ── Codec ───────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn movw_round_trip(rd in 0u8..16, imm16 in any::<u16>()) {
        round_trips(Movw { rd, imm16 })?;
    }

    #[test]
    fn mov_wide_round_trip(rd in 0u8..16, setflags in any::<bool>(), imm12 in 0u16..0x1000) {
        round_trips(MovWide { rd, setflags, imm12 })?;
    }

    #[test]
    fn mov_wide_value_round_trip(value in any::<u32>()) {
        if let Some(mov) = MovWide::with_value(0, value) {
            prop_assert_eq!(mov.value(), value);
        }
    }

    #[test]
    fn movs_round_trip(rd in 0u8..8, imm8 in any::<u8>()) {
        round_trips(Movs { rd, imm8 })?;
    }

    #[test]
    fn ldr_literal_round_trip(rt in 0u8..8, imm8 in any::<u8>()) {
        round_trips(LdrLiteral { rt, imm8 })?;
        round_trips(LiteralLoad::Narrow(LdrLiteral { rt, imm8 }))?;
    }

    #[test]
    fn ldr_wide_literal_round_trip(rt in 0u8..16, add in any::<bool>(), imm12 in 0u16..0x1000) {
        round_trips(LdrWideLiteral { rt, add, imm12 })?;
        round_trips(LiteralLoad::Wide(LdrWideLiteral { rt, add, imm12 }))?;
    }

    #[test]
    fn ldrb_round_trip(rt in 0u8..8, rn in 0u8..8, rm in 0u8..8) {
        round_trips(LdrbRegister { rt, rn, rm })?;
    }

    #[test]
    fn cmp_round_trip(rn in 0u8..8, imm8 in any::<u8>()) {
        round_trips(CmpImm { rn, imm8 })?;
    }

    #[test]
    fn it_round_trip(firstcond in 0u8..15, mask in 1u8..16) {
        let it = It { firstcond, mask };
        round_trips(it)?;
        prop_assert!((1..=4).contains(&it.block_len()));
    }

    #[test]
    fn negs_round_trip(rd in 0u8..8, rn in 0u8..8) {
        round_trips(Negs { rd, rn })?;
    }

    #[test]
    fn bl_round_trip(half in -(1i32 << 23)..(1i32 << 23)) {
        round_trips(Bl { imm32: half * 2 })?;
    }

    #[test]
    fn bl_reaches_its_target(
        from in (0usize..0x40_0000).prop_map(|x| x * 2),
        to in (0usize..0x40_0000).prop_map(|x| x * 2),
    ) {
        let bl = Bl::to(from, to).unwrap();
        prop_assert_eq!(bl.target(from), Some(to));
    }

    #[test]
    fn literal_pool_reached(offset in (0usize..0x4000).prop_map(|x| x * 2), words in 0usize..256) {
        let pool = ((offset + 4) & !3) + words * 4;
        let narrow = LdrLiteral::to_pool(0, offset, pool).unwrap();
        prop_assert_eq!(narrow.pool_offset(offset), pool);
        let wide = LdrWideLiteral::to_pool(0, offset, pool).unwrap();
        prop_assert_eq!(wide.pool_offset(offset), Some(pool));
    }
}

// ── Scanners ────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn skip_selects_nth_match(slots in prop::collection::btree_set(0usize..64, 1..12), skip in 0usize..16) {
        let mut data = nop_buffer(0x100);
        for slot in &slots {
            let offset = slot * 4;
            data[offset..offset + 2].copy_from_slice(&CmpImm { rn: 1, imm8: 0x14 }.encode());
        }
        let offsets: Vec<usize> = slots.iter().map(|slot| slot * 4).collect();

        let forward = find_next_cmp(&data, 0, skip, Some(0x14)).map(|m| m.offset);
        prop_assert_eq!(forward, offsets.get(skip).copied());

        let backward = find_prev_cmp(&data, data.len(), 0, skip, Some(0x14)).map(|m| m.offset);
        prop_assert_eq!(backward, offsets.iter().rev().nth(skip).copied());

        prop_assert!(find_next_cmp(&data, 0, 0, Some(0x15)).is_none());
    }
}

// ── Offset resolution ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn address_round_trip(load in 0u32..0xF000_0000, len in 1usize..0x100_0000, pick in any::<usize>()) {
        let space = AddressSpace::new(load, len);
        let offset = pick % len;
        let address = space.address_of(offset).unwrap();
        prop_assert_eq!(address, load + offset as u32);
        prop_assert_eq!(space.offset_of(address).unwrap(), offset);
        prop_assert!(space.offset_of(load + len as u32).is_err());
    }
}
