//! iBoot Patcher - Thumb-2 Pattern Location and Patching for 32-bit iBoot
//!
//! This library locates well-known instruction sequences in decrypted
//! 32-bit iBoot-family images and rewrites them with fixed replacements:
//! signature check bypasses, custom boot-args, forced debug enablement and
//! UART output.
//!
//! # Features
//!
//! - **Thumb-2 Codec**: Decoders and encoders for the instruction classes the patches touch
//! - **Directed Scanners**: Forward and backward searches with skip counts, filters and windows
//! - **Generation Dispatch**: Version string bucketed into generations 2 through 10
//! - **Patch Reports**: Every rewritten region recorded with its original bytes
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use iboot_patcher::{patch_file, PatchOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = PatchOptions::new().with_boot_args("rd=md0 -v");
//!     let report = patch_file("iBSS.dec", "iBSS.patched", &options)?;
//!     for record in &report.applied {
//!         println!("{record}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Image Model
//!
//! - The load address is the word at `0x20` minus `0x40`
//! - The version string sits at `0x286`, after the `iBoot-` prefix
//! - A stage loads a kernel when it contains a kernel-load marker string
//!
//! Output images always have the same length as their input.

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod address;
pub mod error;
pub mod finder;
pub mod image;
pub mod patcher;
pub mod scanner;
pub mod thumb;
pub mod types;

#[cfg(test)]
mod fixtures;

pub use error::{PatcherError, Result};
pub use finder::Finder;
pub use image::ImageHeader;
pub use patcher::Patcher;
pub use types::{Features, Generation, PatchOptions, PatchRecord, PatchReport, Skipped};

use std::path::Path;

/// Read an image from disk.
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

/// Write an image to disk, replacing any existing file.
pub fn write_image<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
    Ok(std::fs::write(path, bytes)?)
}

/// Patch an in-memory image.
///
/// Returns the patched bytes, always the same length as `data`, and a
/// report of what was applied and skipped.
///
/// # Example
///
/// ```rust,no_run
/// use iboot_patcher::{patch_bytes, PatchOptions};
///
/// let data = std::fs::read("iBoot.dec")?;
/// let (patched, report) = patch_bytes(&data, &PatchOptions::new())?;
/// assert_eq!(patched.len(), data.len());
/// println!("{} regions patched", report.applied.len());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn patch_bytes(data: &[u8], options: &PatchOptions) -> Result<(Vec<u8>, PatchReport)> {
    let mut patcher = Patcher::new(data)?;
    let skipped = patcher.apply(options)?;
    let report = patcher.report(skipped);
    Ok((patcher.into_bytes(), report))
}

/// Read `input`, patch it and write the result to `output`.
///
/// Nothing is written when any selected sequence fails.
pub fn patch_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    options: &PatchOptions,
) -> Result<PatchReport> {
    let data = read_image(input)?;
    let (patched, report) = patch_bytes(&data, options)?;
    write_image(output, &patched)?;
    Ok(report)
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{boot_args_compare, diff, sigcheck_gen3};

    #[test]
    fn test_version() {
        let v = version();
        assert!(!v.is_empty());
    }

    #[test]
    fn test_patch_bytes_preserves_length() {
        let data = sigcheck_gen3().build();
        let (patched, report) = patch_bytes(&data, &PatchOptions::new()).unwrap();
        assert_eq!(patched.len(), data.len());
        assert_eq!(report.applied.len(), 5);
        assert_eq!(report.generation, Generation::Gen3);
        assert!(!diff(&data, &patched).is_empty());
    }

    #[test]
    fn test_patch_bytes_boot_args_only() {
        let data = boot_args_compare().build();
        let options = PatchOptions {
            features: Features::BOOT_ARGS,
            boot_args: Some("-v".into()),
        };
        let (patched, report) = patch_bytes(&data, &options).unwrap();
        assert_eq!(&patched[0x1B00..0x1B03], b"-v\0");
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_patch_bytes_rejects_short_input() {
        let err = patch_bytes(&[0u8; 16], &PatchOptions::new()).unwrap_err();
        assert!(matches!(err, PatcherError::ImageTooSmall { actual: 16, .. }));
    }

    #[test]
    fn test_read_missing_image() {
        let err = read_image("/nonexistent/iBoot.dec").unwrap_err();
        assert!(matches!(err, PatcherError::Io(_)));
    }
}
