//! LRU cache over the FAT blocks.
//!
//! Eight lines of 128 entries each. A logical clock ticks on every access
//! and eviction picks the line with the smallest clock value, writing it
//! back first when dirty. Writes never go through to disk directly; the
//! on-disk FAT is only touched by loads, dirty evictions and
//! [`FatCache::flush`]. Every FAT read or write in the filesystem passes
//! through here.

use crate::device::BlockDevice;
use crate::layout::{FAT_ENTRIES_PER_BLOCK, FAT_FREE};
use crate::{FsError, BLOCK_SIZE};

/// Number of cache lines.
const LINES: usize = 8;
/// Line tag for "holds nothing".
const NO_BLOCK: u32 = 0xFFFF_FFFF;

#[derive(Clone, Copy)]
struct Line {
    /// FAT block index this line holds, or [`NO_BLOCK`].
    block: u32,
    /// Entry copies.
    data: [u32; FAT_ENTRIES_PER_BLOCK as usize],
    /// Line diverges from disk.
    dirty: bool,
    /// Logical clock of the last access.
    last_access: u32,
}

impl Line {
    const fn empty() -> Self {
        Self {
            block: NO_BLOCK,
            data: [FAT_FREE; FAT_ENTRIES_PER_BLOCK as usize],
            dirty: false,
            last_access: 0,
        }
    }
}

/// Statistics the volume aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CacheCounters {
    pub hits: u32,
    pub misses: u32,
}

/// The FAT cache.
pub struct FatCache {
    lines: [Line; LINES],
    clock: u32,
    pub(crate) counters: CacheCounters,
}

impl FatCache {
    /// An empty cache.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: [Line::empty(); LINES],
            clock: 0,
            counters: CacheCounters { hits: 0, misses: 0 },
        }
    }

    /// Drops all lines without writing anything back.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Reads the FAT entry of `cluster`.
    pub fn get<D: BlockDevice>(&mut self, dev: &mut D, cluster: u32) -> Result<u32, FsError> {
        let fat_block = cluster / FAT_ENTRIES_PER_BLOCK;
        let offset = (cluster % FAT_ENTRIES_PER_BLOCK) as usize;
        let line = self.line_for(dev, fat_block)?;
        Ok(self.lines[line].data[offset])
    }

    /// Writes the FAT entry of `cluster`, cache-only.
    pub fn set<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        cluster: u32,
        value: u32,
    ) -> Result<(), FsError> {
        let fat_block = cluster / FAT_ENTRIES_PER_BLOCK;
        let offset = (cluster % FAT_ENTRIES_PER_BLOCK) as usize;
        let line = self.line_for(dev, fat_block)?;
        self.lines[line].data[offset] = value;
        self.lines[line].dirty = true;
        Ok(())
    }

    /// Writes every dirty line back to disk.
    pub fn flush<D: BlockDevice>(&mut self, dev: &mut D) -> Result<(), FsError> {
        for line in &mut self.lines {
            if line.block != NO_BLOCK && line.dirty {
                write_line(dev, line)?;
                line.dirty = false;
            }
        }
        Ok(())
    }

    /// Returns the index of the line holding `fat_block`, loading (and
    /// possibly evicting) as needed.
    fn line_for<D: BlockDevice>(&mut self, dev: &mut D, fat_block: u32) -> Result<usize, FsError> {
        self.clock += 1;

        if let Some(i) = self.lines.iter().position(|l| l.block == fat_block) {
            self.lines[i].last_access = self.clock;
            self.counters.hits += 1;
            return Ok(i);
        }
        self.counters.misses += 1;

        // Evict the line with the minimum clock value.
        let victim = self
            .lines
            .iter()
            .enumerate()
            .min_by_key(|(_, l)| l.last_access)
            .map_or(0, |(i, _)| i);
        if self.lines[victim].block != NO_BLOCK && self.lines[victim].dirty {
            write_line(dev, &self.lines[victim])?;
        }

        // Load the new block.
        let mut buf = [0u8; BLOCK_SIZE];
        if dev.read_block(1 + fat_block, &mut buf).is_err() {
            self.lines[victim] = Line::empty();
            return Err(FsError::Io);
        }
        let line = &mut self.lines[victim];
        line.block = fat_block;
        line.dirty = false;
        line.last_access = self.clock;
        for (i, entry) in line.data.iter_mut().enumerate() {
            *entry = u32::from_le_bytes([
                buf[i * 4],
                buf[i * 4 + 1],
                buf[i * 4 + 2],
                buf[i * 4 + 3],
            ]);
        }
        Ok(victim)
    }
}

impl Default for FatCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes one line back to its exact disk position (`1 + fat_block`).
fn write_line<D: BlockDevice>(dev: &mut D, line: &Line) -> Result<(), FsError> {
    let mut buf = [0u8; BLOCK_SIZE];
    for (i, entry) in line.data.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&entry.to_le_bytes());
    }
    dev.write_block(1 + line.block, &buf)
}
