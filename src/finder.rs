//! Read-only location of every patch site in an iBoot image.
//!
//! A [`Finder`] is a `Copy` view over the original image. Each `find_*`
//! method dispatches on the image generation once, then chains scanner
//! calls until it reaches the instruction a patch sequence rewrites. None
//! of them touch the output buffer, so every search sees the unpatched
//! bytes no matter how many sequences have already run.

use tracing::{debug, warn};

use crate::address::AddressSpace;
use crate::error::{OptionExt, PatcherError, Result};
use crate::image::{can_load_kernel, ImageHeader};
use crate::scanner::{
    find_bytes, find_next_bl, find_next_cmp, find_next_ldr_w_literal, find_next_ldrb,
    find_next_literal_load, find_next_mov_w, find_next_movs, find_next_movw, find_next_negs,
    find_next_unpatched_bl, find_prev_bl, find_prev_cmp, find_prev_it, find_prev_literal,
    find_prev_movs, function_end, Match, PoolLoad,
};
use crate::thumb::{patterns, Bl, CmpImm, It, LdrbRegister, LiteralLoad, MovWide, Movs, Negs};
use crate::types::Generation;

/// `MOVW Rx, #0x414` leading to the gen 3-4 RSA check.
pub const RSA_MOVW: u16 = 0x414;
/// imm12 field of `MOV.W Rx, #0xFFFFFFFF`.
pub const ALL_ONES_IMM12: u16 = 0x3FF;
/// Key length compared against in the certificate callee.
pub const RSA_CMP: u8 = 0x14;
/// `MOVW Rx, #0x107` ahead of the stage-1 UART gate.
pub const UART_MOVW: u16 = 0x107;
/// `MOVW Rx, #0x4F4D` after the gen 5-7 signature verifier call.
pub const SIGVERIFY_MOVW: u16 = 0x4F4D;

/// Default boot-args strings, longest first.
pub const DEFAULT_BOOT_ARGS: &[&str] = &[
    "rd=md0 nand-enable-reformat=1 -progress",
    "rd=md0 -progress",
];
/// String whose storage is reused for caller-supplied boot-args.
pub const BOOT_ARGS_SLOT: &str = "Reliance on this certificate";
pub const DEBUG_ENABLED: &str = "debug-enabled";
pub const DEBUG_UARTS: &str = "debug-uarts";

/// Backward reach from the boot-args load to its guarding `CMP`.
const fn boot_args_window(generation: Generation) -> usize {
    match generation {
        Generation::Gen2 | Generation::Gen3 | Generation::Gen4 => 0x10,
        Generation::Gen5 | Generation::Gen6 => 0x20,
        Generation::Gen7 | Generation::Gen8 | Generation::Gen9 | Generation::Gen10 => 0x30,
    }
}

/// Distance an `IT` may sit before the boot-args load.
const IT_REACH: usize = 8;
/// Distance the null-string load may sit before the `CMP`.
const NULL_LOAD_REACH: usize = 8;
/// Distance between the `debug-uarts` load and its `MOVS Rx, #0`.
const UART_MOVS_REACH: usize = 0x10;

/// A literal tag checked by the gen 3-4 signature routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Prod,
    Sepo,
    Bord,
    Ecid,
}

impl Tag {
    pub const ALL: [Tag; 4] = [Tag::Prod, Tag::Sepo, Tag::Bord, Tag::Ecid];

    pub fn name(self) -> &'static str {
        match self {
            Tag::Prod => "PROD",
            Tag::Sepo => "SEPO",
            Tag::Bord => "BORD",
            Tag::Ecid => "ECID",
        }
    }

    /// The tag as a little-endian pool word stores it.
    pub fn pool_bytes(self) -> [u8; 4] {
        reversed_tag(self.name())
    }
}

fn reversed_tag(tag: &str) -> [u8; 4] {
    let mut bytes = [0u8; 4];
    for (slot, byte) in bytes.iter_mut().zip(tag.bytes().rev()) {
        *slot = byte;
    }
    bytes
}

/// Instruction the RSA check collapses to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaSite {
    /// `MOV.W Rx, #0xFFFFFFFF`
    AllOnes(Match<MovWide>),
    /// `NEGS Rd, Rn`, used when the callee has no `MOV.W`.
    Negate(Match<Negs>),
}

/// How the boot-args load is guarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootArgsGuard {
    /// `CMP Rx, #0` deciding whether the default string is used.
    Compare(Match<CmpImm>),
    /// `CMP` + `IT` selecting between two loads; the other load reads a
    /// pool word one entry past the boot-args pointer.
    Conditional {
        cmp: Match<CmpImm>,
        it: Match<It>,
        load: Match<LiteralLoad>,
        shifted: LiteralLoad,
    },
}

/// Every site the boot-args sequence rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootArgsSite {
    /// Default boot-args string
    pub string: usize,
    /// Literal load of the string's address
    pub load: Match<LiteralLoad>,
    /// Pool entry read by `load`
    pub pool: usize,
    /// Storage reused for the replacement string
    pub slot: usize,
    /// Bytes available at `slot`, including the terminator
    pub capacity: usize,
    pub guard: BootArgsGuard,
}

/// Instruction gating UART output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartSite {
    /// `LDRB` reading the stage-1 enable byte
    Stage1(Match<LdrbRegister>),
    /// `MOVS Rx, #0` next to the `debug-uarts` lookup
    Stage2(Match<Movs>),
}

/// Read-only view over the original image.
#[derive(Debug, Clone, Copy)]
pub struct Finder<'a> {
    data: &'a [u8],
    space: AddressSpace,
    generation: Generation,
    kernel_load: bool,
}

impl<'a> Finder<'a> {
    /// Parse the header of `data` and build a view over it.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let header = ImageHeader::parse(data)?;
        Ok(Self::with_header(data, &header))
    }

    /// Build a view from an already parsed header.
    pub fn with_header(data: &'a [u8], header: &ImageHeader) -> Self {
        Self {
            data,
            space: AddressSpace::new(header.load_address, data.len()),
            generation: header.generation,
            kernel_load: can_load_kernel(data),
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn load_address(&self) -> u32 {
        self.space.load_address()
    }

    pub fn address_space(&self) -> AddressSpace {
        self.space
    }

    /// Whether this stage loads a kernel.
    pub fn kernel_load(&self) -> bool {
        self.kernel_load
    }

    fn unsupported(&self, operation: &'static str) -> PatcherError {
        PatcherError::UnsupportedGeneration {
            operation,
            generation: self.generation,
        }
    }

    fn require_kernel_load(&self, operation: &'static str) -> Result<()> {
        if self.kernel_load {
            Ok(())
        } else {
            Err(PatcherError::KernelLoadRequired { operation })
        }
    }

    /// Offset of a string in the image.
    fn find_string(&self, s: &str) -> Result<usize> {
        let offset = find_bytes(self.data, 0, s.as_bytes()).or_not_found(format!("\"{s}\""))?;
        debug!("Found \"{}\" at 0x{:x}", s, offset);
        Ok(offset)
    }

    /// The `skip`-th literal load of the address of `offset`.
    fn find_address_load(&self, offset: usize, skip: usize, what: &str) -> Result<Match<LiteralLoad>> {
        let address = self.space.address_bytes(offset)?;
        let load = find_next_literal_load(self.data, 0, skip, &address)
            .or_not_found(format!("LDR Rx, ={what}"))?;
        debug!("Found {} (={}) at 0x{:x}", load.insn, what, load.offset);
        Ok(load)
    }

    /// Next `BL` in `start..end`, with its in-image destination.
    fn follow_call(&self, start: usize, end: usize, pattern: &str) -> Result<(Match<Bl>, usize)> {
        let bl = find_next_bl(&self.data[..end], start, 0).or_not_found(pattern)?;
        let target = bl
            .target()
            .filter(|target| *target < self.data.len())
            .ok_or(PatcherError::DecodeMismatch {
                offset: bl.offset,
                expected: "BL into the image",
            })?;
        debug!("Found {} at 0x{:x} -> 0x{:x}", bl.insn, bl.offset, target);
        Ok((bl, target))
    }

    /// The call that checks `tag`: the first `BL` after its literal load.
    ///
    /// A call already replaced with `MOVS R0, #0` twice is not skipped over.
    pub fn find_tag_check(&self, tag: Tag) -> Result<Match<Bl>> {
        match self.generation {
            Generation::Gen3 | Generation::Gen4 => {}
            _ => return Err(self.unsupported(tag.name())),
        }
        let load = find_next_literal_load(self.data, 0, 0, &tag.pool_bytes())
            .or_not_found(format!("LDR Rx, ={}", tag.name()))?;
        debug!("Found {} (={}) at 0x{:x}", load.insn, tag.name(), load.offset);
        let bl = find_next_unpatched_bl(self.data, load.offset, 0, &patterns::RETURN_ZERO)
            .or_not_found(format!("BL after LDR Rx, ={}", tag.name()))?;
        debug!("Found {} check at 0x{:x}", tag.name(), bl.offset);
        Ok(bl)
    }

    pub fn find_prod(&self) -> Result<Match<Bl>> {
        self.find_tag_check(Tag::Prod)
    }

    pub fn find_sepo(&self) -> Result<Match<Bl>> {
        self.find_tag_check(Tag::Sepo)
    }

    pub fn find_bord(&self) -> Result<Match<Bl>> {
        self.find_tag_check(Tag::Bord)
    }

    pub fn find_ecid(&self) -> Result<Match<Bl>> {
        self.find_tag_check(Tag::Ecid)
    }

    /// Locate the instruction producing the RSA check's failure value.
    pub fn find_rsa(&self) -> Result<RsaSite> {
        match self.generation {
            Generation::Gen2 => Err(self.unsupported("RSA")),
            Generation::Gen3 | Generation::Gen4 => self.find_rsa_movw().map(RsaSite::AllOnes),
            Generation::Gen5
            | Generation::Gen6
            | Generation::Gen7
            | Generation::Gen8
            | Generation::Gen9
            | Generation::Gen10 => self.find_rsa_cert_chain(),
        }
    }

    fn find_rsa_movw(&self) -> Result<Match<MovWide>> {
        let movw = find_next_movw(self.data, 0, 0, Some(RSA_MOVW))
            .or_not_found("MOVW Rx, #0x414")?;
        debug!("Found {} at 0x{:x}", movw.insn, movw.offset);
        let mov = find_next_mov_w(self.data, movw.end(), 0, Some(ALL_ONES_IMM12))
            .or_not_found("MOV.W Rx, #0xFFFFFFFF after MOVW Rx, #0x414")?;
        debug!("Found {} at 0x{:x}", mov.insn, mov.offset);
        Ok(mov)
    }

    /// Follow `CERT` -> callee -> callee -> `CMP #0x14` -> callee.
    ///
    /// Every hop after the first stays inside the function it starts in.
    fn find_rsa_cert_chain(&self) -> Result<RsaSite> {
        let load = find_next_literal_load(self.data, 0, 0, &reversed_tag("CERT"))
            .or_not_found("LDR Rx, =CERT")?;
        debug!("Found {} (=CERT) at 0x{:x}", load.insn, load.offset);

        let (_, cert) = self.follow_call(load.offset, self.data.len(), "BL after LDR Rx, =CERT")?;
        let cert_end = function_end(self.data, cert);
        let (_, verify) = self.follow_call(cert, cert_end, "BL in certificate parser")?;
        let verify_end = function_end(self.data, verify);
        let cmp = find_next_cmp(&self.data[..verify_end], verify, 0, Some(RSA_CMP))
            .or_not_found("CMP Rx, #0x14 in certificate verifier")?;
        debug!("Found {} at 0x{:x}", cmp.insn, cmp.offset);
        let (_, rsa) = self.follow_call(cmp.offset, verify_end, "BL after CMP Rx, #0x14")?;

        let body = &self.data[..function_end(self.data, rsa)];
        if let Some(mov) = find_next_mov_w(body, rsa, 0, Some(ALL_ONES_IMM12)) {
            debug!("Found {} at 0x{:x}", mov.insn, mov.offset);
            return Ok(RsaSite::AllOnes(mov));
        }
        let negs = find_next_negs(body, rsa, 0)
            .or_not_found("MOV.W Rx, #0xFFFFFFFF or NEGS in RSA routine")?;
        warn!(
            "No MOV.W Rx, #0xFFFFFFFF in RSA routine at 0x{:x}, using {} at 0x{:x}",
            rsa, negs.insn, negs.offset
        );
        Ok(RsaSite::Negate(negs))
    }

    /// The call whose result decides whether debugging is enabled.
    ///
    /// Anchored on the `LDR.W` of the string's address; short loads of the
    /// same address belong to other lookups.
    pub fn find_debug_enabled(&self) -> Result<Match<Bl>> {
        self.require_kernel_load("debug-enabled")?;
        let string = self.find_string(DEBUG_ENABLED)?;
        let address = self.space.address_bytes(string)?;
        let load = find_next_ldr_w_literal(self.data, 0, 0, &address)
            .or_not_found("LDR.W Rx, =\"debug-enabled\"")?;
        debug!("Found {} (=\"debug-enabled\") at 0x{:x}", load.insn, load.offset);
        let bl = find_next_unpatched_bl(self.data, load.offset, 1, &patterns::RETURN_ONE)
            .or_not_found("second BL after LDR.W Rx, =\"debug-enabled\"")?;
        debug!("Found debug-enabled lookup at 0x{:x}", bl.offset);
        Ok(bl)
    }

    /// Locate every site rewritten when replacing the default boot-args.
    pub fn find_boot_args(&self) -> Result<BootArgsSite> {
        self.require_kernel_load("boot-args")?;
        let window = boot_args_window(self.generation);

        let string = DEFAULT_BOOT_ARGS
            .iter()
            .find_map(|s| find_bytes(self.data, 0, s.as_bytes()))
            .or_not_found("default boot-args string")?;
        debug!("Found default boot-args at 0x{:x}", string);
        let load = self.find_address_load(string, 0, "boot-args")?;
        let pool = load.insn.pool(load.offset).ok_or(PatcherError::DecodeMismatch {
            offset: load.offset,
            expected: "literal load with an in-image pool entry",
        })?;

        let slot = self.find_string(BOOT_ARGS_SLOT)?;
        let capacity = memchr::memchr(0, &self.data[slot..])
            .map(|len| len + 1)
            .or_not_found("terminator of \"Reliance on this certificate\"")?;

        let guard = match find_prev_it(self.data, load.offset, load.offset.saturating_sub(IT_REACH), 0) {
            Some(it) => self.find_conditional_guard(it, pool, window)?,
            None => {
                let before = &self.data[..load.offset];
                let cmp = find_next_cmp(before, load.offset.saturating_sub(window), 0, Some(0))
                    .or_not_found("CMP Rx, #0 before boot-args load")?;
                debug!("Found {} at 0x{:x}", cmp.insn, cmp.offset);
                BootArgsGuard::Compare(cmp)
            }
        };

        Ok(BootArgsSite {
            string,
            load,
            pool,
            slot,
            capacity,
            guard,
        })
    }

    fn find_conditional_guard(&self, it: Match<It>, pool: usize, window: usize) -> Result<BootArgsGuard> {
        debug!("Found {} at 0x{:x}", it.insn, it.offset);
        let cmp = find_prev_cmp(self.data, it.offset, it.offset.saturating_sub(window), 0, Some(0))
            .or_not_found("CMP Rx, #0 before IT")?;
        debug!("Found {} at 0x{:x}", cmp.insn, cmp.offset);

        let load = find_prev_literal::<LiteralLoad>(
            self.data,
            cmp.offset,
            cmp.offset.saturating_sub(NULL_LOAD_REACH),
            0,
            None,
        )
        .ok_or(PatcherError::DecodeMismatch {
            offset: cmp.offset.saturating_sub(2),
            expected: "LDR.W or LDR literal before CMP",
        })?;
        let shifted = load
            .insn
            .previous_word()
            .filter(|shifted| shifted.pool_offset(load.offset) == Some(pool))
            .ok_or(PatcherError::DecodeMismatch {
                offset: load.offset,
                expected: "literal load one word past the boot-args pointer",
            })?;
        debug!("Found {} at 0x{:x} -> {}", load.insn, load.offset, shifted);

        Ok(BootArgsGuard::Conditional {
            cmp,
            it,
            load,
            shifted,
        })
    }

    /// Locate the UART gate for this stage.
    pub fn find_debug_uarts(&self) -> Result<UartSite> {
        if !self.kernel_load {
            let movw = find_next_movw(self.data, 0, 0, Some(UART_MOVW))
                .or_not_found("MOVW Rx, #0x107")?;
            debug!("Found {} at 0x{:x}", movw.insn, movw.offset);
            let ldrb = find_next_ldrb(self.data, movw.end(), 0)
                .or_not_found("LDRB after MOVW Rx, #0x107")?;
            debug!("Found {} at 0x{:x}", ldrb.insn, ldrb.offset);
            return Ok(UartSite::Stage1(ldrb));
        }

        let (skip, after) = match self.generation {
            Generation::Gen2
            | Generation::Gen3
            | Generation::Gen4
            | Generation::Gen5
            | Generation::Gen6 => (0, true),
            Generation::Gen7 | Generation::Gen8 | Generation::Gen9 | Generation::Gen10 => (1, false),
        };
        let string = self.find_string(DEBUG_UARTS)?;
        let load = self.find_address_load(string, skip, "\"debug-uarts\"")?;
        let movs = if after {
            let end = (load.end() + UART_MOVS_REACH).min(self.data.len());
            find_next_movs(&self.data[..end], load.end(), 0, Some(0))
        } else {
            find_prev_movs(self.data, load.offset, load.offset.saturating_sub(UART_MOVS_REACH), 0, Some(0))
        }
        .or_not_found("MOVS Rx, #0 near debug-uarts load")?;
        debug!("Found {} at 0x{:x}", movs.insn, movs.offset);
        Ok(UartSite::Stage2(movs))
    }

    /// The gen 5-7 signature verifier call.
    pub fn find_sigverify(&self) -> Result<Match<Bl>> {
        let reach = match self.generation {
            Generation::Gen5 => 0x90,
            Generation::Gen6 | Generation::Gen7 => 0x70,
            _ => return Err(self.unsupported("signature-verify")),
        };
        let movw = find_next_movw(self.data, 0, 0, Some(SIGVERIFY_MOVW))
            .or_not_found("MOVW Rx, #0x4F4D")?;
        debug!("Found {} at 0x{:x}", movw.insn, movw.offset);
        let bl = find_prev_bl(self.data, movw.offset, movw.offset.saturating_sub(reach), 0)
            .or_not_found("BL before MOVW Rx, #0x4F4D")?;
        debug!("Found signature verifier call at 0x{:x}", bl.offset);
        Ok(bl)
    }
}
