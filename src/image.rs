//! Fixed-offset header fields of a 32-bit iBoot image.
//!
//! The images carry no container format of their own: the load address
//! and the version string sit at fixed offsets, and whether the image can
//! load a kernel is inferred from marker strings.

use memchr::memmem;

use crate::address::read_u32;
use crate::error::{PatcherError, Result};
use crate::types::Generation;

/// Offset of the word holding `load address + 0x40`.
pub const LOAD_ADDRESS_OFFSET: usize = 0x20;
/// Adjustment subtracted from the header word.
pub const LOAD_ADDRESS_ADJUST: u32 = 0x40;
/// Offset of the version string, just past the `iBoot-` prefix.
pub const VERSION_OFFSET: usize = 0x286;
/// Length of the version field.
pub const VERSION_LEN: usize = 10;
/// Smallest buffer that holds every header field.
pub const MIN_IMAGE_LEN: usize = VERSION_OFFSET + VERSION_LEN;

/// Strings only present in stages that load a kernel.
pub const KERNEL_LOAD_MARKERS: &[&[u8]] = &[b"error loading kernelcache", b"__PAGEZERO"];

/// Parsed header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub load_address: u32,
    /// Version string as stored, e.g. `1537.9.55`
    pub version: String,
    pub generation: Generation,
}

impl ImageHeader {
    /// Parse the header of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_IMAGE_LEN {
            return Err(PatcherError::ImageTooSmall {
                expected: MIN_IMAGE_LEN,
                actual: data.len(),
            });
        }
        let version = version_string(data);
        let generation = classify_version(&version)?;
        Ok(Self {
            load_address: load_address(data)?,
            version,
            generation,
        })
    }
}

/// Load address of the image: the word at 0x20 minus 0x40.
pub fn load_address(data: &[u8]) -> Result<u32> {
    read_u32(data, LOAD_ADDRESS_OFFSET)
        .map(|word| word.wrapping_sub(LOAD_ADDRESS_ADJUST))
        .ok_or(PatcherError::ImageTooSmall {
            expected: LOAD_ADDRESS_OFFSET + 4,
            actual: data.len(),
        })
}

/// The version field, cut at the first NUL.
fn version_string(data: &[u8]) -> String {
    let field = &data[VERSION_OFFSET..VERSION_OFFSET + VERSION_LEN];
    let end = memchr::memchr(0, field).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

/// Classify a dotted version string by its numeric prefix.
pub fn classify_version(version: &str) -> Result<Generation> {
    let unrecognized = || PatcherError::UnrecognizedGeneration {
        version: version.to_string(),
    };
    let prefix = version.split('.').next().unwrap_or_default();
    let number: u32 = prefix.parse().map_err(|_| unrecognized())?;
    Generation::from_version_number(number).ok_or_else(unrecognized)
}

/// Whether the image contains any kernel-load marker.
pub fn can_load_kernel(data: &[u8]) -> bool {
    KERNEL_LOAD_MARKERS
        .iter()
        .any(|marker| memmem::find(data, marker).is_some())
}
