//! Patch sequences applied to an owned copy of the image.
//!
//! [`Patcher`] pairs a [`Finder`] over the original bytes with the output
//! buffer. Every sequence first resolves all of its sites through the
//! finder, then writes its regions in one step: a sequence that fails
//! part-way leaves the output untouched.

use tracing::{info, warn};

use crate::error::{PatcherError, Result};
use crate::finder::{BootArgsGuard, Finder, RsaSite, Tag, UartSite};
use crate::image::ImageHeader;
use crate::scanner::Match;
use crate::thumb::{Bl, CmpImm, Instruction, Movs};
use crate::types::{Features, Generation, PatchOptions, PatchRecord, PatchRegion, PatchReport, Skipped};

pub use crate::thumb::patterns::{RETURN_ONE, RETURN_ZERO};

/// `MOVS R0, #0; STR R0, [R3]`: report a verified signature through the out-pointer.
pub const STORE_ZERO: [u8; 4] = [0x00, 0x20, 0x18, 0x60];
/// Two zero bytes, decoding as `MOVS R0, R0`.
pub const ZERO_HALFWORD: [u8; 2] = [0x00, 0x00];
/// Value loaded in place of `MOVS Rx, #0` by the stage-2 UART patch.
pub const UARTS_ENABLED: u8 = 3;

/// Rewrites sites located in the original image into an owned output buffer.
#[derive(Debug)]
pub struct Patcher<'a> {
    finder: Finder<'a>,
    version: String,
    patched: Vec<u8>,
    applied: Vec<PatchRecord>,
}

impl<'a> Patcher<'a> {
    /// Parse `data` and start a session whose output is a copy of it.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let header = ImageHeader::parse(data)?;
        let finder = Finder::with_header(data, &header);
        info!(
            "iBoot {} ({}), loaded at 0x{:08X}, kernel load: {}",
            header.version,
            header.generation,
            header.load_address,
            finder.kernel_load()
        );
        Ok(Self {
            finder,
            version: header.version,
            patched: data.to_vec(),
            applied: Vec::new(),
        })
    }

    pub fn finder(&self) -> &Finder<'a> {
        &self.finder
    }

    pub fn generation(&self) -> Generation {
        self.finder.generation()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The output buffer as patched so far.
    pub fn patched(&self) -> &[u8] {
        &self.patched
    }

    /// Regions written so far, in order.
    pub fn applied(&self) -> &[PatchRecord] {
        &self.applied
    }

    /// Consume the session, returning the output buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.patched
    }

    /// Write `regions` into the output after checking every one fits.
    pub fn write_regions(&mut self, regions: Vec<PatchRegion>) -> Result<()> {
        for region in &regions {
            let end = region.offset.checked_add(region.len());
            if end.map_or(true, |end| end > self.patched.len()) {
                return Err(PatcherError::RegionOutOfBounds {
                    offset: region.offset,
                    len: region.len(),
                });
            }
        }
        for region in regions {
            let range = region.offset..region.offset + region.len();
            let original = self.patched[range.clone()].to_vec();
            self.patched[range].copy_from_slice(&region.replacement);
            let record = PatchRecord {
                name: region.name,
                offset: region.offset,
                original,
                replacement: region.replacement,
            };
            info!("Patched {}", record);
            self.applied.push(record);
        }
        Ok(())
    }

    fn write(&mut self, region: PatchRegion) -> Result<()> {
        self.write_regions(vec![region])
    }

    fn neutralize_call(&mut self, name: &'static str, bl: Match<Bl>, replacement: [u8; 4]) -> Result<()> {
        self.write(PatchRegion::new(name, bl.offset, replacement))
    }

    fn patch_tag(&mut self, tag: Tag) -> Result<()> {
        let bl = self.finder.find_tag_check(tag)?;
        self.neutralize_call(tag.name(), bl, RETURN_ZERO)
    }

    pub fn patch_prod(&mut self) -> Result<()> {
        self.patch_tag(Tag::Prod)
    }

    pub fn patch_sepo(&mut self) -> Result<()> {
        self.patch_tag(Tag::Sepo)
    }

    pub fn patch_bord(&mut self) -> Result<()> {
        self.patch_tag(Tag::Bord)
    }

    pub fn patch_ecid(&mut self) -> Result<()> {
        self.patch_tag(Tag::Ecid)
    }

    /// Make the RSA check produce zero instead of its failure value.
    pub fn patch_rsa(&mut self) -> Result<()> {
        let region = match self.finder.find_rsa()? {
            RsaSite::AllOnes(mov) => PatchRegion::new("RSA", mov.offset, RETURN_ZERO),
            RsaSite::Negate(negs) => {
                let movs = Movs {
                    rd: negs.insn.rd,
                    imm8: 0,
                };
                PatchRegion::new("RSA", negs.offset, movs.encode())
            }
        };
        self.write(region)
    }

    /// Replace the gen 5-7 signature verifier call with a stored success.
    pub fn patch_sigverify(&mut self) -> Result<()> {
        let bl = self.finder.find_sigverify()?;
        self.neutralize_call("signature-verify", bl, STORE_ZERO)
    }

    /// Run every signature-check bypass this generation needs.
    pub fn patch_sigcheck(&mut self) -> Result<()> {
        match self.generation() {
            Generation::Gen2 => Err(PatcherError::UnsupportedGeneration {
                operation: "sigcheck",
                generation: Generation::Gen2,
            }),
            Generation::Gen3 | Generation::Gen4 => {
                self.patch_prod()?;
                self.patch_sepo()?;
                self.patch_bord()?;
                self.patch_ecid()?;
                self.patch_rsa()
            }
            Generation::Gen5 | Generation::Gen6 | Generation::Gen7 => self.patch_sigverify(),
            Generation::Gen8 | Generation::Gen9 | Generation::Gen10 => self.patch_rsa(),
        }
    }

    /// Force the `debug-enabled` lookup to answer true.
    pub fn patch_debug_enabled(&mut self) -> Result<()> {
        let bl = self.finder.find_debug_enabled()?;
        self.neutralize_call("debug-enabled", bl, RETURN_ONE)
    }

    /// Replace the default boot-args with `boot_args`.
    ///
    /// The string is stored NUL-terminated in place of the certificate
    /// reliance notice and the boot-args pool entry is repointed at it.
    /// The guard is then rewritten so the new string is always used.
    pub fn patch_boot_args(&mut self, boot_args: &str) -> Result<()> {
        let site = self.finder.find_boot_args()?;
        let mut string = boot_args.as_bytes().to_vec();
        string.push(0);
        if string.len() > site.capacity {
            return Err(PatcherError::ReplacementTooLong {
                length: string.len(),
                capacity: site.capacity,
            });
        }
        let pointer = self.finder.address_space().address_bytes(site.slot)?;

        let guard = match site.guard {
            BootArgsGuard::Compare(cmp) => {
                let taken = CmpImm { imm8: 1, ..cmp.insn };
                PatchRegion::new("boot-args compare", cmp.offset, taken.encode())
            }
            BootArgsGuard::Conditional { load, shifted, .. } => {
                PatchRegion::new("boot-args null load", load.offset, shifted.encode())
            }
        };
        self.write_regions(vec![
            PatchRegion::new("boot-args string", site.slot, string),
            PatchRegion::new("boot-args pointer", site.pool, pointer),
            guard,
        ])
    }

    /// Enable UART output for this stage.
    pub fn patch_debug_uarts(&mut self) -> Result<()> {
        let region = match self.finder.find_debug_uarts()? {
            UartSite::Stage1(ldrb) => PatchRegion::new("debug-uarts", ldrb.offset, ZERO_HALFWORD),
            UartSite::Stage2(movs) => {
                let enabled = Movs {
                    imm8: UARTS_ENABLED,
                    ..movs.insn
                };
                PatchRegion::new("debug-uarts", movs.offset, enabled.encode())
            }
        };
        self.write(region)
    }

    /// Run the sequences selected by `options` in a fixed order.
    ///
    /// Sequences this image cannot take (wrong generation, no kernel load,
    /// no boot-args given) are reported as skipped; any other failure
    /// aborts the run.
    pub fn apply(&mut self, options: &PatchOptions) -> Result<Vec<Skipped>> {
        let mut skipped = Vec::new();
        if options.features.contains(Features::SIGCHECK) {
            let result = self.patch_sigcheck();
            settle("sigcheck", result, &mut skipped)?;
        }
        if options.features.contains(Features::BOOT_ARGS) {
            match options.boot_args.as_deref() {
                Some(boot_args) => {
                    let result = self.patch_boot_args(boot_args);
                    settle("boot-args", result, &mut skipped)?;
                }
                None => skipped.push(Skipped {
                    sequence: "boot-args",
                    reason: "no boot-args string given".to_string(),
                }),
            }
        }
        if options.features.contains(Features::DEBUG_ENABLED) {
            let result = self.patch_debug_enabled();
            settle("debug-enabled", result, &mut skipped)?;
        }
        if options.features.contains(Features::DEBUG_UARTS) {
            let result = self.patch_debug_uarts();
            settle("debug-uarts", result, &mut skipped)?;
        }
        Ok(skipped)
    }

    /// Summary of the session so far.
    pub fn report(&self, skipped: Vec<Skipped>) -> PatchReport {
        PatchReport {
            load_address: self.finder.load_address(),
            version: self.version.clone(),
            generation: self.generation(),
            kernel_load: self.finder.kernel_load(),
            applied: self.applied.clone(),
            skipped,
        }
    }
}

/// Turn skippable failures into [`Skipped`] entries.
fn settle(sequence: &'static str, result: Result<()>, skipped: &mut Vec<Skipped>) -> Result<()> {
    match result {
        Err(err) if err.is_skippable() => {
            warn!("Skipping {}: {}", sequence, err);
            skipped.push(Skipped {
                sequence,
                reason: err.to_string(),
            });
            Ok(())
        }
        other => other,
    }
}
