use std::any::{Any, TypeId};
use std::path::Path;

use anyhow::{Context, Result};
use hashbrown::HashMap;
use log::{debug, info};

use crate::rom::{DecodedBlock, Rom};

/// Objects loaded out of a ROM, grouped by their concrete type and kept in
/// insertion order.
#[derive(Default)]
pub struct ObjectRegistry {
    objects: HashMap<TypeId, Vec<Box<dyn Any>>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object and returns its index among objects of the same type.
    pub fn add<T: Any>(&mut self, obj: T) -> usize {
        let list = self.objects.entry(TypeId::of::<T>()).or_default();
        list.push(Box::new(obj));
        list.len() - 1
    }

    pub fn get<T: Any>(&self, i: usize) -> Option<&T> {
        self.objects
            .get(&TypeId::of::<T>())?
            .get(i)?
            .downcast_ref::<T>()
    }

    pub fn count<T: Any>(&self) -> usize {
        self.objects
            .get(&TypeId::of::<T>())
            .map_or(0, |list| list.len())
    }

    pub fn iter<T: Any>(&self) -> impl Iterator<Item = &T> {
        self.objects
            .get(&TypeId::of::<T>())
            .into_iter()
            .flatten()
            .filter_map(|obj| obj.downcast_ref::<T>())
    }
}

/// Everything loaded from one ROM image. Created once per image and passed
/// to whatever needs to read from it.
pub struct RomSession {
    pub rom: Rom,
    pub has_header: bool,
    pub objects: ObjectRegistry,
}

impl RomSession {
    pub fn new(rom: Rom) -> Self {
        let has_header = rom.detect_header();
        Self::with_header(rom, has_header)
    }

    pub fn with_header(rom: Rom, has_header: bool) -> Self {
        debug!("ROM session: {} bytes, header={has_header}", rom.len());
        RomSession {
            rom,
            has_header,
            objects: ObjectRegistry::new(),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let rom = Rom::load(path)?;
        let session = RomSession::new(rom);
        info!(
            "Opened {} (header {})",
            path.display(),
            if session.has_header {
                "detected"
            } else {
                "absent"
            }
        );
        Ok(session)
    }

    pub fn read_block(&self, offset: usize) -> BlockReader<'_> {
        BlockReader {
            rom: &self.rom,
            pos: offset,
        }
    }

    pub fn decompress_at(&self, offset: usize, capacity: usize) -> Result<DecodedBlock> {
        self.rom.decompress(offset, capacity)
    }

    pub fn decompress_snes(&self, snes_addr: usize, capacity: usize) -> Result<DecodedBlock> {
        let offset = self
            .rom
            .snes_offset(snes_addr, self.has_header)
            .with_context(|| format!("Unable to locate block at {snes_addr:06X}"))?;
        self.rom.decompress(offset, capacity)
    }
}

/// Sequential reader over a ROM image.
pub struct BlockReader<'a> {
    rom: &'a Rom,
    pos: usize,
}

impl BlockReader<'_> {
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> Result<isize> {
        let x = self.rom.read_u8(self.pos)?;
        self.pos += 1;
        Ok(x)
    }

    pub fn read_u16(&mut self) -> Result<isize> {
        let x = self.rom.read_u16(self.pos)?;
        self.pos += 2;
        Ok(x)
    }

    pub fn read_u24(&mut self) -> Result<isize> {
        let x = self.rom.read_u24(self.pos)?;
        self.pos += 3;
        Ok(x)
    }

    /// Decompresses the block at the current position and moves past it.
    pub fn decompress(&mut self, capacity: usize) -> Result<Vec<u8>> {
        let block = self.rom.decompress(self.pos, capacity)?;
        self.pos += block.consumed;
        Ok(block.bytes)
    }

    pub fn skip_compressed(&mut self) -> Result<()> {
        self.pos = self.rom.next_block(self.pos)?;
        Ok(())
    }
}
