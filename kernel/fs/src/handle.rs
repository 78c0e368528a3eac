//! Open file handles.
//!
//! A fixed table of 32 slots. A handle keeps a sequential cursor (current
//! block + byte offset) so consecutive reads walk the chain without
//! re-seeking, plus the location of the owning directory entry for
//! timestamp write-back on close. A handle does not own the file; closing
//! it only releases the slot.
//!
//! [`FileStream`] adapts a handle to `hadris_io::Read + Seek` so
//! byte-stream consumers can read files without knowing about blocks.

use hadris_io::{Error, ErrorKind, Read, Seek, SeekFrom};

use crate::device::BlockDevice;
use crate::layout::{permits, Cred, Perm, BLOCK_SIZE, FAT_END, FAT_FREE};
use crate::volume::Volume;
use crate::FsError;

/// Number of handle slots.
pub const MAX_HANDLES: usize = 32;

/// Index of an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleId(u8);

impl HandleId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Access mode requested at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlags {
    /// Read-only access.
    Read,
    /// Write access.
    Write,
}

impl OpenFlags {
    fn required_perm(self) -> Perm {
        match self {
            Self::Read => Perm::Read,
            Self::Write => Perm::Write,
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Handle {
    start_block: u32,
    current_block: u32,
    offset: u32,
    size: u32,
    #[allow(dead_code)]
    flags: OpenFlags,
    entry_block: u32,
    entry_slot: usize,
}

pub(crate) struct HandleTable {
    slots: [Option<Handle>; MAX_HANDLES],
}

impl HandleTable {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [None; MAX_HANDLES],
        }
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Opens a file, returning a handle slot.
    ///
    /// Fails with [`FsError::Full`] when all slots are in use and
    /// [`FsError::Param`] for directories.
    pub fn open(&mut self, full_path: &str, flags: OpenFlags, cred: Cred) -> Result<HandleId, FsError> {
        let (entry, eblk, eidx) = self.resolve(full_path, cred)?;
        if entry.is_dir() {
            return Err(FsError::Param);
        }
        if !permits(entry.uid, entry.gid, entry.permissions, cred, flags.required_perm()) {
            return Err(FsError::Access);
        }

        let slot = self
            .handles
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::Full)?;
        self.handles.slots[slot] = Some(Handle {
            start_block: entry.start_block,
            current_block: entry.start_block,
            offset: 0,
            size: entry.size,
            flags,
            entry_block: eblk,
            entry_slot: eidx,
        });
        #[allow(clippy::cast_possible_truncation)]
        let id = HandleId(slot as u8);
        Ok(id)
    }

    /// Closes a handle, stamping the entry's access time.
    pub fn close(&mut self, id: HandleId) {
        if let Some(handle) = self.handles.slots[id.index()].take() {
            let now = self.now();
            // Timestamp write-back is best effort.
            let _ = self.touch_entry(handle.entry_block, handle.entry_slot, |e| {
                e.access_time = now;
            });
        }
    }

    /// Moves a handle's cursor to `offset`, clamped to the file size.
    ///
    /// Linear: the chain is walked from the start, 512 bytes per hop.
    pub fn seek(&mut self, id: HandleId, offset: u32) -> Result<u32, FsError> {
        let mut handle = self.handles.slots[id.index()].ok_or(FsError::Param)?;
        let target = offset.min(handle.size);

        handle.current_block = handle.start_block;
        handle.offset = 0;
        let mut skipped: u32 = 0;
        while skipped + BLOCK_SIZE as u32 <= target {
            handle.current_block = self.get_fat(handle.current_block)?;
            skipped += BLOCK_SIZE as u32;
        }
        handle.offset = target;
        self.handles.slots[id.index()] = Some(handle);
        Ok(target)
    }

    /// Sequential read at the handle cursor. Returns the byte count,
    /// bounded by the remaining file size.
    pub fn read_handle(&mut self, id: HandleId, out: &mut [u8]) -> Result<u32, FsError> {
        let mut handle = self.handles.slots[id.index()].ok_or(FsError::Param)?;
        let available = (handle.size - handle.offset) as usize;
        let total = out.len().min(available);

        let mut read = 0usize;
        while read < total {
            if handle.current_block == FAT_END || handle.current_block == FAT_FREE {
                break;
            }
            let block_offset = (handle.offset as usize) % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - block_offset).min(total - read);
            let buf = self.read_block(handle.current_block)?;
            out[read..read + chunk].copy_from_slice(&buf[block_offset..block_offset + chunk]);
            read += chunk;
            #[allow(clippy::cast_possible_truncation)]
            let chunk32 = chunk as u32;
            handle.offset += chunk32;

            // Advance the cluster cursor on block boundaries.
            if handle.offset as usize % BLOCK_SIZE == 0 && handle.offset < handle.size {
                handle.current_block = self.get_fat(handle.current_block)?;
            }
        }

        self.handles.slots[id.index()] = Some(handle);
        #[allow(clippy::cast_possible_truncation)]
        let read = read as u32;
        Ok(read)
    }

    /// Current cursor position and size of an open handle.
    pub fn handle_pos(&self, id: HandleId) -> Result<(u32, u32), FsError> {
        let handle = self.handles.slots[id.index()].ok_or(FsError::Param)?;
        Ok((handle.offset, handle.size))
    }

    /// Wraps an open handle as a byte stream.
    pub fn stream(&mut self, id: HandleId) -> FileStream<'_, D> {
        FileStream { volume: self, id }
    }
}

/// `hadris_io` view over an open handle.
///
/// Borrows the volume for the duration of the stream; the handle itself
/// stays open after the stream is dropped.
pub struct FileStream<'a, D: BlockDevice> {
    volume: &'a mut Volume<D>,
    id: HandleId,
}

impl<D: BlockDevice> Read for FileStream<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> hadris_io::Result<usize> {
        self.volume
            .read_handle(self.id, buf)
            .map(|n| n as usize)
            .map_err(|_| Error::from_kind(ErrorKind::Other))
    }
}

impl<D: BlockDevice> Seek for FileStream<'_, D> {
    fn seek(&mut self, pos: SeekFrom) -> hadris_io::Result<u64> {
        let (offset, size) = self
            .volume
            .handle_pos(self.id)
            .map_err(|_| Error::from_kind(ErrorKind::Other))?;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(delta) => i64::from(size) + delta,
            SeekFrom::Current(delta) => i64::from(offset) + delta,
        };
        if target < 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "seek to negative position"));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let target = target.min(i64::from(u32::MAX)) as u32;
        self.volume
            .seek(self.id, target)
            .map(u64::from)
            .map_err(|_| Error::from_kind(ErrorKind::Other))
    }
}
