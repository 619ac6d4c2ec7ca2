pub mod address;
pub mod decompress;
pub mod reverse_bits;

use std::path::Path;

use anyhow::{ensure, Context, Result};
use log::{debug, info};

use self::address::{to_file_offset, to_hardware_address};
use self::decompress::{BlockSize, DecompressError};

pub use self::address::AddressError;

// Copier headers pad the image to a multiple of 1 KiB plus 512 bytes.
const HEADER_DETECT_MODULUS: usize = 0x400;

#[derive(Clone)]
pub struct Rom {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub bytes: Vec<u8>,
    /// Compressed bytes read, including the terminator.
    pub consumed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub offset: usize,
    pub decoded: usize,
    pub consumed: usize,
}

impl Rom {
    pub fn new(data: Vec<u8>) -> Self {
        Rom { data }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Unable to load ROM at path {}", path.display()))?;
        info!("Loaded {} bytes from {}", data.len(), path.display());
        Ok(Rom::new(data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Guesses whether the image starts with a 512-byte copier header.
    pub fn detect_header(&self) -> bool {
        self.data.len() % HEADER_DETECT_MODULUS == address::HEADER_SIZE as usize
    }

    pub fn read_u8(&self, addr: usize) -> Result<isize> {
        ensure!(addr < self.data.len(), "read_u8 address out of bounds");
        Ok(self.data[addr] as isize)
    }

    pub fn read_u16(&self, addr: usize) -> Result<isize> {
        ensure!(
            addr + 2 <= self.data.len(),
            "read_u16 address out of bounds"
        );
        let b0 = self.data[addr] as isize;
        let b1 = self.data[addr + 1] as isize;
        Ok(b0 | b1 << 8)
    }

    pub fn read_u24(&self, addr: usize) -> Result<isize> {
        ensure!(
            addr + 3 <= self.data.len(),
            "read_u24 address out of bounds"
        );
        let b0 = self.data[addr] as isize;
        let b1 = self.data[addr + 1] as isize;
        let b2 = self.data[addr + 2] as isize;
        Ok(b0 | b1 << 8 | b2 << 16)
    }

    /// Offset into this image of a SNES address.
    pub fn snes_offset(&self, snes_addr: usize, has_header: bool) -> Result<usize> {
        let offset = to_file_offset(snes_addr, has_header)?;
        ensure!(
            offset >= 0 && (offset as usize) < self.data.len(),
            "SNES address {snes_addr:06X} lies outside the ROM image (offset {offset})"
        );
        Ok(offset as usize)
    }

    pub fn snes_address(&self, offset: usize, has_header: bool) -> Result<usize> {
        let offset = isize::try_from(offset).context("offset does not fit in isize")?;
        Ok(to_hardware_address(offset, has_header)?)
    }

    pub fn decompress(&self, offset: usize, capacity: usize) -> Result<DecodedBlock> {
        let (bytes, consumed) = decompress::decompress_to_vec(&self.data, offset, capacity)
            .with_context(|| format!("Unable to decompress block at offset {offset:#x}"))?;
        debug!(
            "Decompressed block at {offset:#x}: {consumed} bytes -> {} bytes",
            bytes.len()
        );
        Ok(DecodedBlock { bytes, consumed })
    }

    /// Decompresses into a caller-owned buffer, returning the block size.
    pub fn decompress_into(&self, offset: usize, output: &mut [u8]) -> Result<BlockSize> {
        let size = decompress::decompress(&self.data, offset, output)
            .with_context(|| format!("Unable to decompress block at offset {offset:#x}"))?;
        Ok(size)
    }

    pub fn measure(&self, offset: usize) -> Result<BlockSize, DecompressError> {
        let size = decompress::measure(&self.data, offset)?;
        debug!(
            "Measured block at {offset:#x}: {} bytes -> {} bytes",
            size.consumed, size.decoded
        );
        Ok(size)
    }

    /// Offset of the block following the one at `offset`.
    pub fn next_block(&self, offset: usize) -> Result<usize> {
        let size = self
            .measure(offset)
            .with_context(|| format!("Unable to measure block at offset {offset:#x}"))?;
        Ok(offset + size.consumed)
    }

    /// Walks consecutive compressed blocks starting at `offset`.
    pub fn blocks(&self, offset: usize) -> Blocks<'_> {
        Blocks {
            rom: self,
            offset,
            done: false,
        }
    }
}

pub struct Blocks<'a> {
    rom: &'a Rom,
    offset: usize,
    done: bool,
}

impl Iterator for Blocks<'_> {
    type Item = Result<BlockInfo, (usize, DecompressError)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.rom.data.len() {
            return None;
        }
        let offset = self.offset;
        match self.rom.measure(offset) {
            Ok(size) => {
                self.offset += size.consumed;
                Some(Ok(BlockInfo {
                    offset,
                    decoded: size.decoded,
                    consumed: size.consumed,
                }))
            }
            Err(e) => {
                self.done = true;
                Some(Err((offset, e)))
            }
        }
    }
}
