//! Conversion between SNES (HiROM/ExHiROM) addresses and offsets into the
//! battle background data image.
//!
//! File offsets are signed: the data image begins at $CA0000 in a headered
//! ROM, so addresses below that map to negative offsets.

use std::ops::Range;

use thiserror::Error;

/// Size of a copier header at the front of the ROM file.
pub const HEADER_SIZE: isize = 0x200;

/// Position of the data image within a headered ROM file.
pub const DATA_IMAGE_BASE: isize = 0xA0200;

// $40:0000-$5F:FFFF is used as-is; $C0:0000-$FF:FFFF is rebased to zero.
const BANK_A: Range<isize> = 0x400000..0x600000;
const BANK_B: Range<isize> = 0xC00000..0x1000000;
const BANK_B_BASE: isize = 0xC00000;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    #[error("SNES address out of range: {0:#08x}")]
    AddressOutOfRange(usize),
    #[error("file offset out of range: {0:#x}")]
    OffsetOutOfRange(isize),
}

pub fn to_file_offset(address: usize, has_header: bool) -> Result<isize, AddressError> {
    let addr = isize::try_from(address).map_err(|_| AddressError::AddressOutOfRange(address))?;
    let mut rebased = if BANK_A.contains(&addr) {
        addr
    } else if BANK_B.contains(&addr) {
        addr - BANK_B_BASE
    } else {
        return Err(AddressError::AddressOutOfRange(address));
    };
    if has_header {
        rebased += HEADER_SIZE;
    }
    Ok(rebased - DATA_IMAGE_BASE)
}

pub fn to_hardware_address(offset: isize, has_header: bool) -> Result<usize, AddressError> {
    let mut rebased = offset
        .checked_add(DATA_IMAGE_BASE)
        .ok_or(AddressError::OffsetOutOfRange(offset))?;
    if has_header {
        rebased -= HEADER_SIZE;
    }
    let addr = if (0..BANK_A.start).contains(&rebased) {
        rebased + BANK_B_BASE
    } else if BANK_A.contains(&rebased) {
        rebased
    } else {
        return Err(AddressError::OffsetOutOfRange(offset));
    };
    Ok(addr as usize)
}
