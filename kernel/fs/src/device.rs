//! Block device abstraction.

use crate::{FsError, BLOCK_SIZE};

/// A device of 512-byte blocks the filesystem runs on.
///
/// The kernel backs this with the ATA PIO driver; tests use an in-memory
/// disk. Implementations return [`FsError::Io`] for out-of-range or
/// failed transfers.
pub trait BlockDevice {
    /// Reads block `index` into `buf`.
    fn read_block(&mut self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), FsError>;

    /// Writes `buf` to block `index`.
    fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), FsError>;
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// An in-memory block device for tests.
    pub(crate) struct MemDisk {
        blocks: Vec<[u8; BLOCK_SIZE]>,
    }

    impl MemDisk {
        pub(crate) fn new(block_count: u32) -> Self {
            Self {
                blocks: vec![[0u8; BLOCK_SIZE]; block_count as usize],
            }
        }
    }

    impl BlockDevice for MemDisk {
        fn read_block(&mut self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), FsError> {
            let block = self.blocks.get(index as usize).ok_or(FsError::Io)?;
            buf.copy_from_slice(block);
            Ok(())
        }

        fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), FsError> {
            let block = self.blocks.get_mut(index as usize).ok_or(FsError::Io)?;
            block.copy_from_slice(buf);
            Ok(())
        }
    }
}
