//! Conversion between image offsets and the absolute addresses the code uses.
//!
//! Every literal-pool and string-reference patch goes through
//! [`AddressSpace`]; an off-by-one-word mistake here would silently
//! corrupt the patched image.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{PatcherError, Result};

/// Read a little-endian `u32` at `offset`.
pub fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset.checked_add(4)?)
        .map(LittleEndian::read_u32)
}

/// The load address and extent of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace {
    load_address: u32,
    len: usize,
}

impl AddressSpace {
    pub fn new(load_address: u32, len: usize) -> Self {
        Self { load_address, len }
    }

    /// Virtual base address the image expects to run at.
    pub fn load_address(&self) -> u32 {
        self.load_address
    }

    /// Absolute address of the byte at `offset`.
    pub fn address_of(&self, offset: usize) -> Result<u32> {
        u32::try_from(offset)
            .ok()
            .filter(|_| offset < self.len)
            .and_then(|offset| self.load_address.checked_add(offset))
            .ok_or(PatcherError::RegionOutOfBounds { offset, len: 1 })
    }

    /// Image offset of an absolute address.
    pub fn offset_of(&self, address: u32) -> Result<usize> {
        address
            .checked_sub(self.load_address)
            .map(|offset| offset as usize)
            .filter(|offset| *offset < self.len)
            .ok_or(PatcherError::AddressOutOfRange { address })
    }

    /// Absolute address of `offset` as it would be stored in a literal pool.
    pub fn address_bytes(&self, offset: usize) -> Result<[u8; 4]> {
        self.address_of(offset).map(u32::to_le_bytes)
    }

    /// Resolve the pointer stored in the pool entry at `pool` to an image offset.
    pub fn deref_pool(&self, data: &[u8], pool: usize) -> Result<usize> {
        let address = read_u32(data, pool).ok_or(PatcherError::RegionOutOfBounds {
            offset: pool,
            len: 4,
        })?;
        self.offset_of(address)
    }
}
