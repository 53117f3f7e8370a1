//! Synthetic iBoot images for unit tests.
//!
//! Layout: header fields in `0x000..0x300`, `NOP.N`-filled code in
//! `0x300..0x1800`, zero-filled string data from `0x1800`.

use crate::image::{LOAD_ADDRESS_ADJUST, LOAD_ADDRESS_OFFSET, VERSION_OFFSET};
use crate::thumb::{
    condition, patterns, Bl, CmpImm, Instruction, It, LdrLiteral, LdrWideLiteral, MovWide, Movs,
    Movw,
};

pub const LOAD_ADDRESS: u32 = 0x5FF0_0000;
pub const IMAGE_LEN: usize = 0x2000;
pub const CODE_START: usize = 0x300;
pub const DATA_START: usize = 0x1800;
/// Offset of the kernel-load marker when present.
pub const MARKER_OFFSET: usize = 0x1F00;

pub struct ImageBuilder {
    data: Vec<u8>,
}

impl ImageBuilder {
    pub fn new(version: &str) -> Self {
        let mut data = vec![0u8; IMAGE_LEN];
        let word = LOAD_ADDRESS + LOAD_ADDRESS_ADJUST;
        data[LOAD_ADDRESS_OFFSET..LOAD_ADDRESS_OFFSET + 4].copy_from_slice(&word.to_le_bytes());
        data[0x280..0x286].copy_from_slice(b"iBoot-");
        data[VERSION_OFFSET..VERSION_OFFSET + version.len()].copy_from_slice(version.as_bytes());
        for offset in (CODE_START..DATA_START).step_by(2) {
            data[offset..offset + 2].copy_from_slice(&patterns::NOP.to_le_bytes());
        }
        Self { data }
    }

    /// Add the marker that identifies a kernel-loading stage.
    pub fn kernel_load(mut self) -> Self {
        self.put_str(MARKER_OFFSET, "error loading kernelcache\n");
        self
    }

    pub fn put(&mut self, offset: usize, insn: &impl Instruction) -> &mut Self {
        let bytes = insn.encode();
        self.put_bytes(offset, &bytes)
    }

    pub fn put_bytes(&mut self, offset: usize, bytes: &[u8]) -> &mut Self {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// NUL-terminated string.
    pub fn put_str(&mut self, offset: usize, s: &str) -> &mut Self {
        self.put_bytes(offset, s.as_bytes());
        self.data[offset + s.len()] = 0;
        self
    }

    pub fn put_bl(&mut self, offset: usize, target: usize) -> &mut Self {
        let bl = Bl::to(offset, target).expect("branch in range");
        self.put(offset, &bl)
    }

    /// `LDR Rt, [PC, ..]` at `offset` reading `pool`, which is set to `value`.
    pub fn put_ldr(&mut self, offset: usize, rt: u8, pool: usize, value: &[u8]) -> &mut Self {
        let ldr = LdrLiteral::to_pool(rt, offset, pool).expect("pool reachable");
        self.put(offset, &ldr);
        self.put_bytes(pool, value)
    }

    /// `LDR.W Rt, [PC, ..]` at `offset` reading `pool`, which is set to `value`.
    pub fn put_ldr_w(&mut self, offset: usize, rt: u8, pool: usize, value: &[u8]) -> &mut Self {
        let ldr = LdrWideLiteral::to_pool(rt, offset, pool).expect("pool reachable");
        self.put(offset, &ldr);
        self.put_bytes(pool, value)
    }

    pub fn put_return(&mut self, offset: usize) -> &mut Self {
        self.put_bytes(offset, &patterns::BX_LR.to_le_bytes())
    }

    pub fn build(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// Absolute address of an image offset.
pub fn address(offset: usize) -> u32 {
    LOAD_ADDRESS + offset as u32
}

/// Little-endian literal-pool bytes for the address of `offset`.
pub fn address_bytes(offset: usize) -> [u8; 4] {
    address(offset).to_le_bytes()
}

/// Offsets whose bytes differ between two equally sized buffers.
pub fn diff(before: &[u8], after: &[u8]) -> Vec<usize> {
    assert_eq!(before.len(), after.len());
    before
        .iter()
        .zip(after)
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(offset, _)| offset)
        .collect()
}

/// Storage reused for replacement boot-args.
pub const RELIANCE: &str = "Reliance on this certificate by any party assumes acceptance of the \
                            then applicable standard terms and conditions of use";

/// Gen 3 image with all four tag checks and the `MOVW #0x414` RSA check.
pub fn sigcheck_gen3() -> ImageBuilder {
    let mut image = ImageBuilder::new("700.1.2");
    image
        .put_ldr(0x400, 0, 0x440, b"DORP")
        .put_bl(0x404, 0x1000)
        .put_ldr(0x480, 1, 0x4C0, b"OPES")
        .put_bl(0x486, 0x1000)
        .put_ldr(0x500, 2, 0x540, b"DROB")
        .put_bl(0x508, 0x1000)
        .put_ldr(0x580, 3, 0x5C0, b"DICE")
        .put_bl(0x584, 0x1000)
        .put(0x600, &Movw { rd: 0, imm16: 0x414 })
        .put(0x610, &all_ones(1))
        .put_return(0x1000);
    image
}

/// `CERT` load -> 0x800 -> 0x900 (`CMP #0x14`) -> routine at 0xA00 ending at 0xA12.
pub fn cert_chain(version: &str) -> ImageBuilder {
    let mut image = ImageBuilder::new(version);
    image
        .put_ldr(0x400, 0, 0x420, b"TREC")
        .put_bl(0x404, 0x800)
        .put_bl(0x808, 0x900)
        .put_return(0x80C)
        .put(0x904, &CmpImm { rn: 0, imm8: 0x14 })
        .put_bl(0x908, 0xA00)
        .put_return(0x90C)
        .put_return(0xA10);
    image
}

/// `CMP R0, #0` followed by an unconditional boot-args load at 0x604.
pub fn boot_args_compare() -> ImageBuilder {
    let mut image = ImageBuilder::new("900.1.1").kernel_load();
    image
        .put_str(0x1A00, "rd=md0 nand-enable-reformat=1 -progress")
        .put_str(0x1B00, RELIANCE)
        .put(0x600, &CmpImm { rn: 0, imm8: 0 })
        .put_ldr(0x604, 1, 0x640, &address_bytes(0x1A00));
    image
}

/// Null-string load, `CMP R0, #0`, `ITE NE`, boot-args load; pool entries
/// at 0x640 (boot-args) and 0x644 (empty string).
pub fn boot_args_conditional() -> ImageBuilder {
    let mut image = ImageBuilder::new("1537.9.55").kernel_load();
    image
        .put_str(0x1A00, "rd=md0 nand-enable-reformat=1 -progress")
        .put_str(0x1B00, RELIANCE)
        .put_str(0x1C00, "")
        .put_ldr(0x5F8, 2, 0x644, &address_bytes(0x1C00))
        .put(0x5FA, &CmpImm { rn: 0, imm8: 0 })
        .put(0x5FC, &It { firstcond: condition::NE, mask: 0x4 })
        .put_ldr(0x5FE, 1, 0x640, &address_bytes(0x1A00));
    image
}

/// Two `debug-uarts` loads (0x700, 0x780), each with a `MOVS Rx, #0`
/// on either side.
pub fn uarts_stage2(version: &str) -> ImageBuilder {
    let mut image = ImageBuilder::new(version).kernel_load();
    image
        .put_str(0x1D00, "debug-uarts")
        .put_ldr(0x700, 0, 0x740, &address_bytes(0x1D00))
        .put(0x704, &Movs { rd: 1, imm8: 0 })
        .put(0x77C, &Movs { rd: 2, imm8: 0 })
        .put_ldr(0x780, 0, 0x7C0, &address_bytes(0x1D00))
        .put(0x784, &Movs { rd: 3, imm8: 0 });
    image
}

/// `MOV.W Rd, #0xFFFFFFFF`
pub fn all_ones(rd: u8) -> MovWide {
    MovWide::with_value(rd, 0xFFFF_FFFF).expect("encodable")
}
