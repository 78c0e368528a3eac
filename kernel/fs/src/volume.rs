//! Volume operations: mount/format, allocation, path resolution, and the
//! public file and directory calls.
//!
//! Every mutating call updates the affected entry's `modify_time`,
//! flushes the FAT cache, and bumps the volume generation counter so
//! external observers (the compositor, file views) can invalidate cached
//! listings.

use baryon_core::{kdebug, kerror};

use crate::cache::FatCache;
use crate::device::BlockDevice;
use crate::handle::HandleTable;
use crate::layout::{
    permits, Attributes, Cred, DirEntry, Perm, Superblock, BLOCK_SIZE, DIR_ENTRIES_PER_BLOCK,
    FAT_END, FAT_FREE, PERM_DEFAULT, PFS32_MAGIC,
};
use crate::{path, FsError};

/// Source of Unix timestamps for entry times.
pub type ClockFn = fn() -> u32;

/// Aggregated diagnostics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
    /// Blocks read from the device.
    pub disk_reads: u32,
    /// Blocks written to the device.
    pub disk_writes: u32,
    /// FAT cache hits.
    pub cache_hits: u32,
    /// FAT cache misses.
    pub cache_misses: u32,
}

/// A mounted PFS32 volume over a block device.
pub struct Volume<D: BlockDevice> {
    dev: D,
    sb: Superblock,
    cache: FatCache,
    /// Allocation cursor: scanning starts at the block after the last
    /// successful allocation and wraps once.
    last_alloc: u32,
    generation: u32,
    clock: ClockFn,
    disk_reads: u32,
    disk_writes: u32,
    pub(crate) handles: HandleTable,
}

impl<D: BlockDevice> Volume<D> {
    /// Mounts an existing volume.
    pub fn mount(mut dev: D, clock: ClockFn) -> Result<Self, FsError> {
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_block(0, &mut buf)?;
        let sb = Superblock::read_from(&buf);
        if sb.magic != PFS32_MAGIC {
            kerror!("pfs32: bad superblock magic {:#010x}", sb.magic);
            return Err(FsError::NoFs);
        }
        kdebug!(
            "pfs32: mounted '{}', {} blocks",
            sb.label(),
            sb.total_blocks
        );
        let last_alloc = sb.data_start_block;
        Ok(Self {
            dev,
            sb,
            cache: FatCache::new(),
            last_alloc,
            generation: 0,
            clock,
            disk_reads: 0,
            disk_writes: 0,
            handles: HandleTable::new(),
        })
    }

    /// Formats the device and mounts the fresh volume.
    ///
    /// Writes the superblock, zero-fills the FAT, marks the metadata
    /// blocks used, and seeds the root directory with `.` and `..`.
    pub fn format(mut dev: D, label: &str, total_blocks: u32, clock: ClockFn) -> Result<Self, FsError> {
        let mut sb = Superblock::create(label, total_blocks);
        // Root directory occupies one data block from the start.
        sb.free_blocks -= 1;

        let mut buf = [0u8; BLOCK_SIZE];
        sb.write_to(&mut buf);
        dev.write_block(0, &buf)?;

        let zero = [0u8; BLOCK_SIZE];
        for i in 1..=sb.fat_blocks {
            dev.write_block(i, &zero)?;
        }

        let mut vol = Self {
            dev,
            sb,
            cache: FatCache::new(),
            last_alloc: 0,
            generation: 0,
            clock,
            disk_reads: 0,
            disk_writes: 0,
            handles: HandleTable::new(),
        };
        vol.last_alloc = vol.sb.data_start_block;

        // Superblock, FAT and root are chain terminators.
        for block in 0..=vol.sb.root_dir_block {
            vol.set_fat(block, FAT_END)?;
        }

        let now = (vol.clock)();
        let mut root = [0u8; BLOCK_SIZE];
        let root_block = vol.sb.root_dir_block;
        for (slot, name, target) in [(0, ".", root_block), (1, "..", root_block)] {
            let mut e = DirEntry::empty();
            e.name[..name.len()].copy_from_slice(name.as_bytes());
            e.attributes = Attributes::DIRECTORY;
            e.permissions = PERM_DEFAULT;
            e.start_block = target;
            e.create_time = now;
            e.modify_time = now;
            e.store(&mut root, slot);
        }
        vol.write_block(root_block, &root)?;
        vol.cache.flush(&mut vol.dev)?;
        kdebug!("pfs32: formatted '{}', {} blocks", label, total_blocks);
        Ok(vol)
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    /// The superblock of the mounted volume.
    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Monotone counter bumped on every mutation.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Current time from the volume clock.
    pub(crate) fn now(&self) -> u32 {
        (self.clock)()
    }

    /// Diagnostics counters.
    #[must_use]
    pub fn stats(&self) -> FsStats {
        FsStats {
            disk_reads: self.disk_reads,
            disk_writes: self.disk_writes,
            cache_hits: self.cache.counters.hits,
            cache_misses: self.cache.counters.misses,
        }
    }

    /// Counts free blocks by scanning the FAT.
    pub fn count_free_blocks(&mut self) -> Result<u32, FsError> {
        let mut free = 0;
        for block in self.sb.data_start_block..self.sb.total_blocks {
            if self.get_fat(block)? == FAT_FREE {
                free += 1;
            }
        }
        Ok(free)
    }

    // -----------------------------------------------------------------
    // Block and FAT primitives
    // -----------------------------------------------------------------

    pub(crate) fn read_block(&mut self, index: u32) -> Result<[u8; BLOCK_SIZE], FsError> {
        if index >= self.sb.total_blocks {
            return Err(FsError::Io);
        }
        let mut buf = [0u8; BLOCK_SIZE];
        self.dev.read_block(index, &mut buf)?;
        self.disk_reads += 1;
        Ok(buf)
    }

    pub(crate) fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), FsError> {
        if index >= self.sb.total_blocks {
            return Err(FsError::Io);
        }
        self.dev.write_block(index, buf)?;
        self.disk_writes += 1;
        Ok(())
    }

    pub(crate) fn get_fat(&mut self, cluster: u32) -> Result<u32, FsError> {
        self.cache.get(&mut self.dev, cluster)
    }

    pub(crate) fn set_fat(&mut self, cluster: u32, value: u32) -> Result<(), FsError> {
        self.cache.set(&mut self.dev, cluster, value)
    }

    /// Allocates one block: first free FAT entry from the cursor, one
    /// wrap-around, marked end-of-chain, data zero-filled.
    fn alloc_block(&mut self) -> Result<u32, FsError> {
        let start = if (self.sb.data_start_block..self.sb.total_blocks).contains(&self.last_alloc) {
            self.last_alloc
        } else {
            self.sb.data_start_block
        };

        let ranges = [(start, self.sb.total_blocks), (self.sb.data_start_block, start)];
        for (lo, hi) in ranges {
            for block in lo..hi {
                if self.get_fat(block)? == FAT_FREE {
                    self.set_fat(block, FAT_END)?;
                    self.write_block(block, &[0u8; BLOCK_SIZE])?;
                    self.last_alloc = block + 1;
                    self.sb.free_blocks = self.sb.free_blocks.saturating_sub(1);
                    return Ok(block);
                }
            }
        }
        kerror!("pfs32: volume full");
        Err(FsError::Full)
    }

    /// Frees a whole chain, resetting every entry to [`FAT_FREE`].
    fn free_chain(&mut self, start: u32) -> Result<(), FsError> {
        let mut cur = start;
        while cur != FAT_END && cur != FAT_FREE {
            let next = self.get_fat(cur)?;
            self.set_fat(cur, FAT_FREE)?;
            self.sb.free_blocks += 1;
            cur = next;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Directory machinery
    // -----------------------------------------------------------------

    /// Searches a directory chain for `name`.
    ///
    /// Returns the entry plus the block and slot it was found in, so
    /// callers can write it back.
    pub(crate) fn find_in_dir(
        &mut self,
        dir_start: u32,
        name: &str,
    ) -> Result<(DirEntry, u32, usize), FsError> {
        let mut cur = dir_start;
        while cur != FAT_END && cur != FAT_FREE {
            let buf = self.read_block(cur)?;
            for slot in 0..DIR_ENTRIES_PER_BLOCK {
                let entry = DirEntry::parse(&buf, slot);
                if !entry.is_free() && entry.name() == name {
                    return Ok((entry, cur, slot));
                }
            }
            cur = self.get_fat(cur)?;
        }
        Err(FsError::NotFound)
    }

    /// Resolves a path to the block of the directory it names.
    ///
    /// Each traversed component must be a directory the caller may
    /// execute; symlinks are not followed (single-level resolution is a
    /// known limitation).
    pub fn dir_block(&mut self, dir_path: &str, cred: Cred) -> Result<u32, FsError> {
        let mut cur = self.sb.root_dir_block;
        for component in path::components(dir_path) {
            let (entry, _, _) = self.find_in_dir(cur, component)?;
            if entry.is_symlink() {
                return Err(FsError::Access);
            }
            if !entry.is_dir() {
                return Err(FsError::NotFound);
            }
            if !permits(entry.uid, entry.gid, entry.permissions, cred, Perm::Exec) {
                return Err(FsError::Access);
            }
            cur = entry.start_block;
        }
        Ok(cur)
    }

    /// Resolves a full path to its directory entry and location.
    pub(crate) fn resolve(
        &mut self,
        full_path: &str,
        cred: Cred,
    ) -> Result<(DirEntry, u32, usize), FsError> {
        let (parent, name) = path::split(full_path);
        if name.is_empty() {
            return Err(FsError::Param);
        }
        let pblk = self.dir_block(parent, cred)?;
        self.find_in_dir(pblk, name)
    }

    /// Rewrites one entry in place through a closure.
    pub(crate) fn touch_entry(
        &mut self,
        block: u32,
        slot: usize,
        f: impl FnOnce(&mut DirEntry),
    ) -> Result<(), FsError> {
        let mut buf = self.read_block(block)?;
        let mut entry = DirEntry::parse(&buf, slot);
        f(&mut entry);
        entry.store(&mut buf, slot);
        self.write_block(block, &buf)
    }

    // -----------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------

    /// Creates a file or directory at `full_path`.
    pub fn create(&mut self, full_path: &str, is_dir: bool, cred: Cred) -> Result<(), FsError> {
        let (parent, name) = path::split(full_path);
        if name.is_empty() {
            return Err(FsError::Param);
        }
        let pblk = self.dir_block(parent, cred)?;
        if self.find_in_dir(pblk, name).is_ok() {
            return Err(FsError::Exists);
        }

        // Find a free slot, extending the directory chain if necessary.
        let (slot_block, slot_idx, mut buf) = self.free_dir_slot(pblk)?;

        let data_block = self.alloc_block()?;
        let now = (self.clock)();

        let mut entry = DirEntry::empty();
        entry.set_name(name);
        entry.attributes = if is_dir {
            Attributes::DIRECTORY
        } else {
            Attributes::empty()
        };
        entry.uid = cred.uid;
        entry.gid = cred.gid;
        entry.permissions = PERM_DEFAULT;
        entry.start_block = data_block;
        entry.create_time = now;
        entry.modify_time = now;

        if is_dir {
            let mut dir_buf = [0u8; BLOCK_SIZE];
            for (slot, name, target) in [(0, ".", data_block), (1, "..", pblk)] {
                let mut e = DirEntry::empty();
                e.name[..name.len()].copy_from_slice(name.as_bytes());
                e.attributes = Attributes::DIRECTORY;
                e.permissions = PERM_DEFAULT;
                e.uid = cred.uid;
                e.gid = cred.gid;
                e.start_block = target;
                e.create_time = now;
                e.modify_time = now;
                e.store(&mut dir_buf, slot);
            }
            self.write_block(data_block, &dir_buf)?;
        }

        entry.store(&mut buf, slot_idx);
        self.write_block(slot_block, &buf)?;
        self.sb.total_files += 1;
        self.finish_mutation()
    }

    /// Writes `data` to `full_path`, creating the file if absent. The
    /// chain grows or shrinks to fit; returns the byte count written.
    pub fn write_file(&mut self, full_path: &str, data: &[u8], cred: Cred) -> Result<u32, FsError> {
        match self.create(full_path, false, cred) {
            Ok(()) | Err(FsError::Exists) => {}
            Err(e) => return Err(e),
        }

        let (entry, eblk, eidx) = self.resolve(full_path, cred)?;
        if entry.is_dir() {
            return Err(FsError::Param);
        }
        if !permits(entry.uid, entry.gid, entry.permissions, cred, Perm::Write) {
            return Err(FsError::Access);
        }

        let mut block = entry.start_block;
        let mut written = 0usize;
        while written < data.len() {
            let chunk = (data.len() - written).min(BLOCK_SIZE);
            let mut buf = [0u8; BLOCK_SIZE];
            buf[..chunk].copy_from_slice(&data[written..written + chunk]);
            self.write_block(block, &buf)?;
            written += chunk;

            if written < data.len() {
                let next = self.get_fat(block)?;
                let next = if next == FAT_END || next == FAT_FREE {
                    let fresh = self.alloc_block()?;
                    self.set_fat(block, fresh)?;
                    fresh
                } else {
                    next
                };
                block = next;
            }
        }

        // Drop any leftover tail from a previously larger file.
        let tail = self.get_fat(block)?;
        if tail != FAT_END && tail != FAT_FREE {
            self.set_fat(block, FAT_END)?;
            self.free_chain(tail)?;
        }

        let now = (self.clock)();
        #[allow(clippy::cast_possible_truncation)]
        let size = data.len() as u32;
        self.touch_entry(eblk, eidx, |e| {
            e.size = size;
            e.modify_time = now;
        })?;
        self.finish_mutation()?;
        Ok(size)
    }

    /// Reads up to `out.len()` bytes of `full_path` into `out`, bounded
    /// by the recorded size. Stamps the access time.
    pub fn read_file(&mut self, full_path: &str, out: &mut [u8], cred: Cred) -> Result<u32, FsError> {
        let (entry, eblk, eidx) = self.resolve(full_path, cred)?;
        if !permits(entry.uid, entry.gid, entry.permissions, cred, Perm::Read) {
            return Err(FsError::Access);
        }
        if entry.is_dir() {
            return Err(FsError::Param);
        }

        let now = (self.clock)();
        self.touch_entry(eblk, eidx, |e| e.access_time = now)?;

        let total = (entry.size as usize).min(out.len());
        let mut block = entry.start_block;
        let mut read = 0usize;
        while read < total && block != FAT_END && block != FAT_FREE {
            let buf = self.read_block(block)?;
            let chunk = (total - read).min(BLOCK_SIZE);
            out[read..read + chunk].copy_from_slice(&buf[..chunk]);
            read += chunk;
            block = self.get_fat(block)?;
        }
        #[allow(clippy::cast_possible_truncation)]
        let read = read as u32;
        Ok(read)
    }

    /// Grows or shrinks a file to `new_size` bytes.
    pub fn truncate(&mut self, full_path: &str, new_size: u32, cred: Cred) -> Result<(), FsError> {
        let (entry, eblk, eidx) = self.resolve(full_path, cred)?;
        if !permits(entry.uid, entry.gid, entry.permissions, cred, Perm::Write) {
            return Err(FsError::Access);
        }
        if entry.is_dir() {
            return Err(FsError::Param);
        }
        if new_size == entry.size {
            return Ok(());
        }

        if new_size < entry.size {
            // Walk to the last retained block, then cut the chain.
            let mut block = entry.start_block;
            let mut covered: u32 = BLOCK_SIZE as u32;
            while covered < new_size {
                block = self.get_fat(block)?;
                covered += BLOCK_SIZE as u32;
            }
            let tail = self.get_fat(block)?;
            if tail != FAT_END && tail != FAT_FREE {
                self.set_fat(block, FAT_END)?;
                self.free_chain(tail)?;
            }
        } else {
            // Walk to the end, then chain fresh blocks until covered.
            let mut block = entry.start_block;
            let mut capacity: u32 = BLOCK_SIZE as u32;
            loop {
                let next = self.get_fat(block)?;
                if next == FAT_END || next == FAT_FREE {
                    break;
                }
                block = next;
                capacity += BLOCK_SIZE as u32;
            }
            while capacity < new_size {
                let fresh = self.alloc_block()?;
                self.set_fat(block, fresh)?;
                block = fresh;
                capacity += BLOCK_SIZE as u32;
            }
        }

        let now = (self.clock)();
        self.touch_entry(eblk, eidx, |e| {
            e.size = new_size;
            e.modify_time = now;
        })?;
        self.finish_mutation()
    }

    /// Copies a file. Fails with [`FsError::Param`] on directories.
    pub fn copy(&mut self, src: &str, dst: &str, cred: Cred) -> Result<(), FsError> {
        let src_entry = self.stat(src, cred)?;
        if src_entry.is_dir() {
            return Err(FsError::Param);
        }
        let mut data = alloc::vec![0u8; src_entry.size as usize];
        self.read_file(src, &mut data, cred)?;
        self.write_file(dst, &data, cred)?;
        Ok(())
    }

    /// Renames within a single directory; cross-directory moves are not
    /// supported.
    pub fn rename(&mut self, old: &str, new: &str, cred: Cred) -> Result<(), FsError> {
        let (old_parent, _) = path::split(old);
        let (new_parent, new_name) = path::split(new);
        if old_parent != new_parent || new_name.is_empty() {
            return Err(FsError::Param);
        }
        let pblk = self.dir_block(old_parent, cred)?;
        if self.find_in_dir(pblk, new_name).is_ok() {
            return Err(FsError::Exists);
        }
        let (entry, eblk, eidx) = self.resolve(old, cred)?;
        if !permits(entry.uid, entry.gid, entry.permissions, cred, Perm::Write) {
            return Err(FsError::Access);
        }
        let now = (self.clock)();
        self.touch_entry(eblk, eidx, |e| {
            e.set_name(new_name);
            e.modify_time = now;
        })?;
        self.finish_mutation()
    }

    /// Deletes a file or an empty directory: tombstones the entry and
    /// frees the chain.
    pub fn delete(&mut self, full_path: &str, cred: Cred) -> Result<(), FsError> {
        let (entry, eblk, eidx) = self.resolve(full_path, cred)?;
        if !permits(entry.uid, entry.gid, entry.permissions, cred, Perm::Write) {
            return Err(FsError::Access);
        }
        if entry.is_dir() && !self.dir_is_empty(entry.start_block)? {
            return Err(FsError::NotEmpty);
        }

        self.touch_entry(eblk, eidx, |e| e.name[0] = 0)?;
        self.free_chain(entry.start_block)?;
        self.sb.total_files = self.sb.total_files.saturating_sub(1);
        self.finish_mutation()
    }

    /// Fills `out` with the live entries of the directory chain starting
    /// at `block`. Returns the count.
    pub fn listdir(&mut self, block: u32, out: &mut [DirEntry]) -> Result<usize, FsError> {
        let mut count = 0;
        let mut cur = block;
        while cur != FAT_END && cur != FAT_FREE && count < out.len() {
            let buf = self.read_block(cur)?;
            for slot in 0..DIR_ENTRIES_PER_BLOCK {
                if count >= out.len() {
                    break;
                }
                let entry = DirEntry::parse(&buf, slot);
                if !entry.is_free() {
                    out[count] = entry;
                    count += 1;
                }
            }
            cur = self.get_fat(cur)?;
        }
        Ok(count)
    }

    /// Looks up a path and returns its entry.
    pub fn stat(&mut self, full_path: &str, cred: Cred) -> Result<DirEntry, FsError> {
        let (_, name) = path::split(full_path);
        if name.is_empty() {
            // The root has no entry of its own; synthesize one.
            let mut root = DirEntry::empty();
            root.name[0] = b'/';
            root.attributes = Attributes::DIRECTORY;
            root.permissions = PERM_DEFAULT;
            root.start_block = self.sb.root_dir_block;
            return Ok(root);
        }
        self.resolve(full_path, cred).map(|(e, _, _)| e)
    }

    /// Flushes the FAT cache and the superblock.
    pub fn sync(&mut self) -> Result<(), FsError> {
        self.cache.flush(&mut self.dev)?;
        let mut buf = [0u8; BLOCK_SIZE];
        self.sb.write_to(&mut buf);
        self.dev.write_block(0, &buf)?;
        Ok(())
    }

    /// Consistency check. Currently validates the superblock only.
    pub fn fsck(&mut self, _repair: bool) -> Result<(), FsError> {
        if self.sb.magic != PFS32_MAGIC {
            return Err(FsError::NoFs);
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    /// FAT flush plus generation bump; tail of every mutating call.
    fn finish_mutation(&mut self) -> Result<(), FsError> {
        self.cache.flush(&mut self.dev)?;
        self.generation = self.generation.wrapping_add(1);
        Ok(())
    }

    /// Finds (or creates) a free slot in a directory chain. Returns the
    /// slot's block, index, and the block's current contents.
    fn free_dir_slot(&mut self, dir_start: u32) -> Result<(u32, usize, [u8; BLOCK_SIZE]), FsError> {
        let mut cur = dir_start;
        loop {
            let buf = self.read_block(cur)?;
            for slot in 0..DIR_ENTRIES_PER_BLOCK {
                if DirEntry::parse(&buf, slot).is_free() {
                    return Ok((cur, slot, buf));
                }
            }
            let next = self.get_fat(cur)?;
            if next == FAT_END || next == FAT_FREE {
                let fresh = self.alloc_block()?;
                self.set_fat(cur, fresh)?;
                return Ok((fresh, 0, [0u8; BLOCK_SIZE]));
            }
            cur = next;
        }
    }

    /// True when a directory chain holds nothing but `.` and `..`.
    fn dir_is_empty(&mut self, dir_start: u32) -> Result<bool, FsError> {
        let mut cur = dir_start;
        while cur != FAT_END && cur != FAT_FREE {
            let buf = self.read_block(cur)?;
            for slot in 0..DIR_ENTRIES_PER_BLOCK {
                let entry = DirEntry::parse(&buf, slot);
                if !entry.is_free() && entry.name() != "." && entry.name() != ".." {
                    return Ok(false);
                }
            }
            cur = self.get_fat(cur)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testutil::MemDisk;

    fn test_clock() -> u32 {
        1_750_000_000
    }

    fn fresh() -> Volume<MemDisk> {
        Volume::format(MemDisk::new(1024), "TEST", 1024, test_clock).unwrap()
    }

    #[test]
    fn format_then_mount_round_trips_superblock() {
        let vol = fresh();
        let sb = vol.superblock().clone();
        let Volume { dev, .. } = vol;
        let vol2 = Volume::mount(dev, test_clock).unwrap();
        assert_eq!(*vol2.superblock(), sb);
        assert_eq!(vol2.superblock().label(), "TEST");
    }

    #[test]
    fn mount_rejects_unformatted_disk() {
        assert!(matches!(
            Volume::mount(MemDisk::new(64), test_clock),
            Err(FsError::NoFs)
        ));
    }

    #[test]
    fn root_contains_dot_and_dotdot() {
        let mut vol = fresh();
        let root = vol.superblock().root_dir_block;
        let mut entries = [DirEntry::empty(); 8];
        let n = vol.listdir(root, &mut entries).unwrap();
        assert_eq!(n, 2);
        assert_eq!(entries[0].name(), ".");
        assert_eq!(entries[1].name(), "..");
    }

    #[test]
    fn end_to_end_write_read_listdir() {
        let mut vol = fresh();
        vol.create("/a", true, Cred::ROOT).unwrap();
        vol.create("/a/b.txt", false, Cred::ROOT).unwrap();
        assert_eq!(vol.write_file("/a/b.txt", b"hello", Cred::ROOT).unwrap(), 5);

        let mut buf = [0u8; 16];
        let n = vol.read_file("/a/b.txt", &mut buf, Cred::ROOT).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");

        let dir = vol.dir_block("/a", Cred::ROOT).unwrap();
        let mut entries = [DirEntry::empty(); 8];
        let count = vol.listdir(dir, &mut entries).unwrap();
        let names: Vec<&str> = entries[..count].iter().map(DirEntry::name).collect();
        assert_eq!(names, vec![".", "..", "b.txt"]);
    }

    #[test]
    fn multi_block_round_trip() {
        let mut vol = fresh();
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        vol.write_file("/big.bin", &data, Cred::ROOT).unwrap();
        let mut back = vec![0u8; 4096];
        let n = vol.read_file("/big.bin", &mut back, Cred::ROOT).unwrap();
        assert_eq!(n as usize, data.len());
        assert_eq!(&back[..data.len()], &data[..]);
    }

    #[test]
    fn delete_restores_free_blocks_and_forgets_file() {
        let mut vol = fresh();
        let free_before = vol.count_free_blocks().unwrap();
        let data = vec![7u8; 1500]; // three blocks
        vol.write_file("/t.bin", &data, Cred::ROOT).unwrap();
        assert_eq!(vol.count_free_blocks().unwrap(), free_before - 3);

        vol.delete("/t.bin", Cred::ROOT).unwrap();
        assert_eq!(vol.count_free_blocks().unwrap(), free_before);
        let mut buf = [0u8; 8];
        assert!(matches!(
            vol.read_file("/t.bin", &mut buf, Cred::ROOT),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn overwrite_shrinks_chain() {
        let mut vol = fresh();
        let free_before = vol.count_free_blocks().unwrap();
        vol.write_file("/s.bin", &vec![1u8; 2048], Cred::ROOT).unwrap();
        vol.write_file("/s.bin", b"tiny", Cred::ROOT).unwrap();
        assert_eq!(vol.count_free_blocks().unwrap(), free_before - 1);
        let mut buf = [0u8; 16];
        assert_eq!(vol.read_file("/s.bin", &mut buf, Cred::ROOT).unwrap(), 4);
    }

    #[test]
    fn create_twice_reports_exists() {
        let mut vol = fresh();
        vol.create("/x", false, Cred::ROOT).unwrap();
        assert!(matches!(
            vol.create("/x", false, Cred::ROOT),
            Err(FsError::Exists)
        ));
    }

    #[test]
    fn truncate_shrink_and_grow() {
        let mut vol = fresh();
        let free_before = vol.count_free_blocks().unwrap();
        vol.write_file("/t.bin", &vec![9u8; 1500], Cred::ROOT).unwrap();
        vol.truncate("/t.bin", 400, Cred::ROOT).unwrap();
        assert_eq!(vol.count_free_blocks().unwrap(), free_before - 1);
        assert_eq!(vol.stat("/t.bin", Cred::ROOT).unwrap().size, 400);

        vol.truncate("/t.bin", 1200, Cred::ROOT).unwrap();
        assert_eq!(vol.stat("/t.bin", Cred::ROOT).unwrap().size, 1200);
        assert_eq!(vol.count_free_blocks().unwrap(), free_before - 3);
    }

    #[test]
    fn copy_duplicates_contents() {
        let mut vol = fresh();
        vol.write_file("/orig", b"copy me", Cred::ROOT).unwrap();
        vol.copy("/orig", "/dup", Cred::ROOT).unwrap();
        let mut buf = [0u8; 16];
        let n = vol.read_file("/dup", &mut buf, Cred::ROOT).unwrap();
        assert_eq!(&buf[..n as usize], b"copy me");
    }

    #[test]
    fn copy_rejects_directories() {
        let mut vol = fresh();
        vol.create("/d", true, Cred::ROOT).unwrap();
        assert!(matches!(
            vol.copy("/d", "/d2", Cred::ROOT),
            Err(FsError::Param)
        ));
    }

    #[test]
    fn rename_same_parent_only() {
        let mut vol = fresh();
        vol.write_file("/a.txt", b"x", Cred::ROOT).unwrap();
        vol.rename("/a.txt", "/b.txt", Cred::ROOT).unwrap();
        assert!(vol.stat("/b.txt", Cred::ROOT).is_ok());
        assert!(matches!(
            vol.stat("/a.txt", Cred::ROOT),
            Err(FsError::NotFound)
        ));

        vol.create("/sub", true, Cred::ROOT).unwrap();
        assert!(matches!(
            vol.rename("/b.txt", "/sub/b.txt", Cred::ROOT),
            Err(FsError::Param)
        ));
    }

    #[test]
    fn delete_refuses_non_empty_directory() {
        let mut vol = fresh();
        vol.create("/d", true, Cred::ROOT).unwrap();
        vol.write_file("/d/f", b"1", Cred::ROOT).unwrap();
        assert!(matches!(
            vol.delete("/d", Cred::ROOT),
            Err(FsError::NotEmpty)
        ));
        vol.delete("/d/f", Cred::ROOT).unwrap();
        vol.delete("/d", Cred::ROOT).unwrap();
    }

    #[test]
    fn permissions_gate_writes_for_non_root() {
        let mut vol = fresh();
        let owner = Cred { uid: 5, gid: 5 };
        let stranger = Cred { uid: 9, gid: 9 };
        vol.write_file("/owned", b"secret", owner).unwrap();

        // World has no write bit: a stranger cannot write, the owner can.
        assert!(matches!(
            vol.write_file("/owned", b"clobber", stranger),
            Err(FsError::Access)
        ));
        assert!(vol.write_file("/owned", b"update", owner).is_ok());

        // Reading is world-permitted under the default bits.
        let mut buf = [0u8; 16];
        assert!(vol.read_file("/owned", &mut buf, stranger).is_ok());
    }

    #[test]
    fn exec_bit_gates_traversal() {
        let mut vol = fresh();
        let owner = Cred { uid: 5, gid: 5 };
        let stranger = Cred { uid: 9, gid: 9 };
        vol.create("/priv", true, owner).unwrap();
        vol.write_file("/priv/f", b"1", owner).unwrap();

        // Strip world exec from the directory entry.
        let (_, eblk, eidx) = vol.resolve("/priv", Cred::ROOT).unwrap();
        vol.touch_entry(eblk, eidx, |e| e.permissions = pack_perm_test(0b111, 0b101, 0b10))
            .unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(
            vol.read_file("/priv/f", &mut buf, stranger),
            Err(FsError::Access)
        ));
        assert!(vol.read_file("/priv/f", &mut buf, owner).is_ok());
    }

    fn pack_perm_test(owner: u8, group: u8, world: u8) -> u8 {
        crate::layout::pack_perm(owner, group, world)
    }

    #[test]
    fn symlink_attribute_blocks_traversal() {
        let mut vol = fresh();
        vol.create("/ln", true, Cred::ROOT).unwrap();
        let (_, eblk, eidx) = vol.resolve("/ln", Cred::ROOT).unwrap();
        vol.touch_entry(eblk, eidx, |e| e.attributes |= Attributes::SYMLINK)
            .unwrap();
        assert!(matches!(
            vol.dir_block("/ln", Cred::ROOT),
            Err(FsError::Access)
        ));
    }

    #[test]
    fn generation_counts_mutations_only() {
        let mut vol = fresh();
        let g0 = vol.generation();
        vol.write_file("/g", b"1", Cred::ROOT).unwrap();
        let g1 = vol.generation();
        assert!(g1 > g0);
        let mut buf = [0u8; 4];
        vol.read_file("/g", &mut buf, Cred::ROOT).unwrap();
        assert_eq!(vol.generation(), g1);
        vol.delete("/g", Cred::ROOT).unwrap();
        assert!(vol.generation() > g1);
    }

    #[test]
    fn directory_chain_extends_past_eight_entries() {
        let mut vol = fresh();
        for i in 0..20 {
            let name = format!("/f{i}");
            vol.create(&name, false, Cred::ROOT).unwrap();
        }
        let root = vol.superblock().root_dir_block;
        let mut entries = [DirEntry::empty(); 32];
        let n = vol.listdir(root, &mut entries).unwrap();
        assert_eq!(n, 22); // . .. plus 20 files
    }

    #[test]
    fn timestamps_come_from_the_clock() {
        let mut vol = fresh();
        vol.write_file("/t", b"x", Cred::ROOT).unwrap();
        let e = vol.stat("/t", Cred::ROOT).unwrap();
        assert_eq!(e.create_time, test_clock());
        assert_eq!(e.modify_time, test_clock());
    }

    #[test]
    fn fsck_accepts_healthy_volume() {
        let mut vol = fresh();
        assert!(vol.fsck(false).is_ok());
    }

    #[test]
    fn volume_full_reports() {
        let mut vol = Volume::format(MemDisk::new(16), "TINY", 16, test_clock).unwrap();
        // 16 blocks: 1 superblock + 1 FAT + root leaves 13 free.
        let big = vec![1u8; 16 * BLOCK_SIZE];
        assert!(matches!(
            vol.write_file("/big", &big, Cred::ROOT),
            Err(FsError::Full)
        ));
    }
}
