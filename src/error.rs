//! Error types for the iBoot patcher.
//!
//! Every search is deterministic over a static buffer, so none of these
//! are retried. Each variant carries enough detail (pattern name, offset)
//! to diagnose a version mismatch or an unsupported image by hand.

use thiserror::Error;

use crate::types::Generation;

/// Primary error type for the iBoot patcher.
#[derive(Debug, Error)]
pub enum PatcherError {
    /// IO error while reading or writing an image.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The image is too small to hold the fixed header fields.
    #[error("Image too small: expected at least {expected} bytes, got {actual}")]
    ImageTooSmall { expected: usize, actual: usize },

    /// A required instruction, string or pattern was not located.
    #[error("Failed to find {pattern}")]
    PatternNotFound { pattern: String },

    /// The version string does not fall into any known generation range.
    #[error("Unrecognized iBoot version: {version:?}")]
    UnrecognizedGeneration { version: String },

    /// Bytes at an offset did not decode as the instruction the caller relied on.
    #[error("Expected {expected} at offset 0x{offset:X}")]
    DecodeMismatch {
        offset: usize,
        expected: &'static str,
    },

    /// The replacement string (plus terminator) does not fit its slot.
    #[error("Replacement of {length} bytes does not fit slot of {capacity} bytes")]
    ReplacementTooLong { length: usize, capacity: usize },

    /// The patch sequence has no implementation for this generation yet.
    #[error("{operation} is not implemented for {generation}")]
    UnsupportedGeneration {
        operation: &'static str,
        generation: Generation,
    },

    /// The patch sequence only applies to images that load a kernel.
    #[error("{operation} requires an image that loads a kernel")]
    KernelLoadRequired { operation: &'static str },

    /// An absolute address does not map into the image.
    #[error("Address 0x{address:08X} is outside the image")]
    AddressOutOfRange { address: u32 },

    /// A patch region does not fit inside the image.
    #[error("Patch region at 0x{offset:X} ({len} bytes) is out of bounds")]
    RegionOutOfBounds { offset: usize, len: usize },
}

impl PatcherError {
    pub(crate) fn not_found(pattern: impl Into<String>) -> Self {
        PatcherError::PatternNotFound {
            pattern: pattern.into(),
        }
    }

    /// Whether the error means "skip this sequence" rather than "the run failed".
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            PatcherError::UnsupportedGeneration { .. } | PatcherError::KernelLoadRequired { .. }
        )
    }
}

/// Result type alias for patcher operations.
pub type Result<T> = std::result::Result<T, PatcherError>;

/// Extension trait for attaching a pattern name to a failed search.
pub trait OptionExt<T> {
    /// Convert `None` into [`PatcherError::PatternNotFound`].
    fn or_not_found(self, pattern: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, pattern: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| PatcherError::not_found(pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PatcherError::ImageTooSmall {
            expected: 0x290,
            actual: 4,
        };
        assert!(err.to_string().contains("656"));
        assert!(err.to_string().contains("4"));
    }

    #[test]
    fn test_pattern_name_in_message() {
        let err = None::<u8>.or_not_found("LDR Rx, =PROD").unwrap_err();
        assert_eq!(err.to_string(), "Failed to find LDR Rx, =PROD");
    }

    #[test]
    fn test_decode_mismatch_offset() {
        let err = PatcherError::DecodeMismatch {
            offset: 0xBEEF,
            expected: "LDR literal",
        };
        assert!(err.to_string().contains("BEEF"));
    }

    #[test]
    fn test_skippable() {
        let err = PatcherError::KernelLoadRequired {
            operation: "debug-enabled",
        };
        assert!(err.is_skippable());
        assert!(!PatcherError::not_found("BL").is_skippable());
    }
}
