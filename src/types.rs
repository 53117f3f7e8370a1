//! Core types for the iBoot patcher.
//!
//! This module defines the firmware generation classification, the
//! options that select which patch sequences run, and the records that
//! describe every byte range a session rewrote.

use bitflags::bitflags;
use serde::{Serialize, Serializer};
use std::fmt;

/// Firmware generation, bucketed by the numeric iBoot version prefix.
///
/// Instruction ordering and code shapes change between generations, so
/// every patch sequence dispatches on this once before searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "u8")]
pub enum Generation {
    Gen2,
    Gen3,
    Gen4,
    Gen5,
    Gen6,
    Gen7,
    Gen8,
    Gen9,
    Gen10,
}

/// Inclusive iBoot version ranges for each generation.
pub const GENERATION_RANGES: &[(Generation, u32, u32)] = &[
    (Generation::Gen2, 320, 572),
    (Generation::Gen3, 573, 817),
    (Generation::Gen4, 818, 1072),
    (Generation::Gen5, 1073, 1536),
    (Generation::Gen6, 1537, 1939),
    (Generation::Gen7, 1940, 2260),
    (Generation::Gen8, 2261, 2816),
    (Generation::Gen9, 2817, 3392),
    (Generation::Gen10, 3393, 4075),
];

impl Generation {
    /// Map a numeric iBoot version (e.g. `1537` from `1537.9.55`) to its generation.
    pub fn from_version_number(version: u32) -> Option<Self> {
        GENERATION_RANGES
            .iter()
            .find(|(_, low, high)| (*low..=*high).contains(&version))
            .map(|(generation, _, _)| *generation)
    }

    /// Numeric generation (2 through 10).
    pub fn number(self) -> u8 {
        match self {
            Generation::Gen2 => 2,
            Generation::Gen3 => 3,
            Generation::Gen4 => 4,
            Generation::Gen5 => 5,
            Generation::Gen6 => 6,
            Generation::Gen7 => 7,
            Generation::Gen8 => 8,
            Generation::Gen9 => 9,
            Generation::Gen10 => 10,
        }
    }
}

impl From<Generation> for u8 {
    fn from(generation: Generation) -> u8 {
        generation.number()
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation {}", self.number())
    }
}

bitflags! {
    /// Patch sequences a session should run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u8 {
        /// Signature check bypass for the image's generation.
        const SIGCHECK = 1 << 0;
        /// Replace the default boot-args string.
        const BOOT_ARGS = 1 << 1;
        /// Force the `debug-enabled` check to succeed.
        const DEBUG_ENABLED = 1 << 2;
        /// Enable serial output on all UARTs.
        const DEBUG_UARTS = 1 << 3;
    }
}

/// Patch session options.
#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// Sequences to run
    pub features: Features,
    /// Replacement boot-args, required by [`Features::BOOT_ARGS`]
    pub boot_args: Option<String>,
}

impl PatchOptions {
    /// Signature check bypass only.
    pub fn new() -> Self {
        Self {
            features: Features::SIGCHECK,
            boot_args: None,
        }
    }

    /// Every sequence, with the given boot-args.
    pub fn all(boot_args: impl Into<String>) -> Self {
        Self {
            features: Features::all(),
            boot_args: Some(boot_args.into()),
        }
    }

    /// Builder-style boot-args setter; enables [`Features::BOOT_ARGS`].
    pub fn with_boot_args(mut self, boot_args: impl Into<String>) -> Self {
        self.features |= Features::BOOT_ARGS;
        self.boot_args = Some(boot_args.into());
        self
    }
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A same-length replacement of bytes at an offset of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRegion {
    /// Short name of the site being patched
    pub name: &'static str,
    /// Byte offset into the image
    pub offset: usize,
    /// Replacement bytes
    pub replacement: Vec<u8>,
}

impl PatchRegion {
    pub fn new(name: &'static str, offset: usize, replacement: impl Into<Vec<u8>>) -> Self {
        Self {
            name,
            offset,
            replacement: replacement.into(),
        }
    }

    /// Number of bytes the region covers.
    pub fn len(&self) -> usize {
        self.replacement.len()
    }

    /// Whether the region covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.replacement.is_empty()
    }
}

/// A region that has been written, with the bytes it replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchRecord {
    pub name: &'static str,
    #[serde(serialize_with = "serialize_offset")]
    pub offset: usize,
    #[serde(serialize_with = "serialize_hex")]
    pub original: Vec<u8>,
    #[serde(serialize_with = "serialize_hex")]
    pub replacement: Vec<u8>,
}

impl fmt::Display for PatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at 0x{:X}: {} -> {}",
            self.name,
            self.offset,
            hex::encode(&self.original),
            hex::encode(&self.replacement)
        )
    }
}

/// A sequence that was selected but not run, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub sequence: &'static str,
    pub reason: String,
}

/// Summary of one patch session.
#[derive(Debug, Clone, Serialize)]
pub struct PatchReport {
    #[serde(serialize_with = "serialize_address")]
    pub load_address: u32,
    pub version: String,
    pub generation: Generation,
    pub kernel_load: bool,
    pub applied: Vec<PatchRecord>,
    pub skipped: Vec<Skipped>,
}

fn serialize_offset<S: Serializer>(offset: &usize, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{offset:X}"))
}

fn serialize_address<S: Serializer>(address: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{address:08X}"))
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}
