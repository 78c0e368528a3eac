//! PFS32: the Baryon filesystem.
//!
//! A volume is a superblock, a flat FAT of next-block pointers, and a data
//! area of 512-byte blocks. Files and directories are cluster chains
//! threaded through the FAT; directories hold eight 64-byte entries per
//! block. FAT traffic goes through a small LRU cache; directory and data
//! blocks are read and written directly.
//!
//! The crate is generic over a [`BlockDevice`], so every operation runs
//! against an in-memory disk in the unit tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod cache;
mod device;
mod handle;
mod layout;
mod path;
mod volume;

pub use cache::FatCache;
pub use device::BlockDevice;
pub use handle::{FileStream, HandleId, OpenFlags, MAX_HANDLES};
pub use layout::{
    pack_perm, Attributes, Cred, DirEntry, Perm, Superblock, BLOCK_SIZE, DIR_ENTRIES_PER_BLOCK,
    FAT_END, FAT_FREE, NAME_MAX, PERM_DEFAULT, PFS32_MAGIC, PFS32_VERSION,
};
pub use volume::{ClockFn, FsStats, Volume};

use core::fmt;

/// The closed set of filesystem failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Device I/O failed.
    Io,
    /// No mounted filesystem / bad superblock magic.
    NoFs,
    /// No free blocks left.
    Full,
    /// Path component or entry not found.
    NotFound,
    /// Entry already exists.
    Exists,
    /// Permission denied.
    Access,
    /// Directory not empty.
    NotEmpty,
    /// Invalid argument.
    Param,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => f.write_str("io error"),
            Self::NoFs => f.write_str("no filesystem"),
            Self::Full => f.write_str("volume full"),
            Self::NotFound => f.write_str("not found"),
            Self::Exists => f.write_str("already exists"),
            Self::Access => f.write_str("access denied"),
            Self::NotEmpty => f.write_str("directory not empty"),
            Self::Param => f.write_str("invalid parameter"),
        }
    }
}
