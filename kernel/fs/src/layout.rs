//! On-disk layout: superblock, directory entries, permissions.
//!
//! All multi-byte fields are little-endian. Block 0 is the superblock,
//! blocks `1..=fat_blocks` the FAT, everything after `data_start_block`
//! is data. The layout is fixed; a runtime-configurable block size is not
//! supported.

use bitflags::bitflags;

/// Block size in bytes. Compile-time constant by design.
pub const BLOCK_SIZE: usize = 512;
/// FAT entry: free block.
pub const FAT_FREE: u32 = 0;
/// FAT entry: end of chain.
pub const FAT_END: u32 = 0xFFFF_FFFF;
/// FAT entries per 512-byte FAT block.
pub const FAT_ENTRIES_PER_BLOCK: u32 = (BLOCK_SIZE / 4) as u32;
/// Superblock magic, "PF32".
pub const PFS32_MAGIC: u32 = 0x5346_5050;
/// On-disk format version.
pub const PFS32_VERSION: u32 = 2;
/// Directory entries per directory block.
pub const DIR_ENTRIES_PER_BLOCK: usize = 8;
/// Size of one directory entry on disk.
pub const DIR_ENTRY_SIZE: usize = 64;
/// Maximum stored filename length (one byte short of the field for the
/// terminator convention the original format uses).
pub const NAME_MAX: usize = 39;

bitflags! {
    /// Directory entry attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attributes: u8 {
        /// Read-only.
        const READONLY  = 1 << 0;
        /// Hidden from normal listings.
        const HIDDEN    = 1 << 1;
        /// System file.
        const SYSTEM    = 1 << 2;
        /// Volume label entry.
        const VOLUME    = 1 << 3;
        /// Entry is a directory.
        const DIRECTORY = 1 << 4;
        /// Archive bit.
        const ARCHIVE   = 1 << 5;
        /// Entry is a symbolic link.
        const SYMLINK   = 1 << 6;
    }
}

/// Caller identity for permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cred {
    /// User id; 0 is root and bypasses all checks.
    pub uid: u8,
    /// Group id.
    pub gid: u8,
}

impl Cred {
    /// The root identity.
    pub const ROOT: Cred = Cred { uid: 0, gid: 0 };
}

/// A requested access kind, with its permission mask value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Perm {
    /// Read access (mask 4).
    Read = 4,
    /// Write access (mask 2).
    Write = 2,
    /// Execute / traverse access (mask 1).
    Exec = 1,
}

/// Packs owner/group/world permission triplets into the on-disk byte:
/// owner rwx in bits 7..5, group rwx in bits 4..2, world rx in bits 1..0.
#[must_use]
pub const fn pack_perm(owner: u8, group: u8, world_rx: u8) -> u8 {
    ((owner & 0b111) << 5) | ((group & 0b111) << 2) | (world_rx & 0b11)
}

/// Default permissions for new nodes: `rwxr-xr-x`.
pub const PERM_DEFAULT: u8 = pack_perm(0b111, 0b101, 0b11);

/// Checks `cred` against an entry's packed permission byte.
///
/// Root bypasses; otherwise the owner, group and world fields are tried
/// in that order. The packed world field has no write bit, so world
/// writes are always denied.
#[must_use]
pub fn permits(uid: u8, gid: u8, perm: u8, cred: Cred, op: Perm) -> bool {
    if cred.uid == 0 {
        return true;
    }
    if cred.uid == uid {
        let owner = (perm >> 5) & 0b111;
        return owner & op as u8 != 0;
    }
    if cred.gid == gid {
        let group = (perm >> 2) & 0b111;
        return group & op as u8 != 0;
    }
    let world = perm & 0b11;
    match op {
        Perm::Read => world & 0b10 != 0,
        Perm::Exec => world & 0b01 != 0,
        Perm::Write => false,
    }
}

/// The block-0 superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Must be [`PFS32_MAGIC`].
    pub magic: u32,
    /// Format version.
    pub version: u32,
    /// Block size; always 512.
    pub block_size: u32,
    /// Total blocks in the volume.
    pub total_blocks: u32,
    /// Number of FAT blocks following the superblock.
    pub fat_blocks: u32,
    /// First data block.
    pub data_start_block: u32,
    /// Block of the root directory.
    pub root_dir_block: u32,
    /// Free-block count (advisory; refreshed on sync).
    pub free_blocks: u32,
    /// Total live files (advisory).
    pub total_files: u32,
    /// Volume label, NUL padded.
    pub volume_label: [u8; 32],
}

impl Superblock {
    /// Builds a fresh superblock for `total_blocks` blocks.
    #[must_use]
    pub fn create(label: &str, total_blocks: u32) -> Self {
        let fat_blocks = total_blocks.div_ceil(FAT_ENTRIES_PER_BLOCK);
        let data_start_block = 1 + fat_blocks;
        let mut volume_label = [0u8; 32];
        let bytes = label.as_bytes();
        let len = bytes.len().min(31);
        volume_label[..len].copy_from_slice(&bytes[..len]);
        Self {
            magic: PFS32_MAGIC,
            version: PFS32_VERSION,
            block_size: BLOCK_SIZE as u32,
            total_blocks,
            fat_blocks,
            data_start_block,
            root_dir_block: data_start_block,
            free_blocks: total_blocks - data_start_block,
            total_files: 0,
            volume_label,
        }
    }

    /// Serializes into a block-0 image.
    pub fn write_to(&self, buf: &mut [u8; BLOCK_SIZE]) {
        buf.fill(0);
        for (i, v) in [
            self.magic,
            self.version,
            self.block_size,
            self.total_blocks,
            self.fat_blocks,
            self.data_start_block,
            self.root_dir_block,
            self.free_blocks,
            self.total_files,
        ]
        .iter()
        .enumerate()
        {
            buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        buf[36..68].copy_from_slice(&self.volume_label);
    }

    /// Deserializes from a block-0 image.
    #[must_use]
    pub fn read_from(buf: &[u8; BLOCK_SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let mut volume_label = [0u8; 32];
        volume_label.copy_from_slice(&buf[36..68]);
        Self {
            magic: word(0),
            version: word(4),
            block_size: word(8),
            total_blocks: word(12),
            fat_blocks: word(16),
            data_start_block: word(20),
            root_dir_block: word(24),
            free_blocks: word(28),
            total_files: word(32),
            volume_label,
        }
    }

    /// The label as text.
    #[must_use]
    pub fn label(&self) -> &str {
        let len = self
            .volume_label
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.volume_label.len());
        core::str::from_utf8(&self.volume_label[..len]).unwrap_or("")
    }
}

/// An in-memory directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// Raw filename bytes; first byte 0 marks a tombstone or empty slot.
    pub name: [u8; 40],
    /// File size in bytes (0 for directories).
    pub size: u32,
    /// First cluster of the chain.
    pub start_block: u32,
    /// Attribute bits.
    pub attributes: Attributes,
    /// Owner user id.
    pub uid: u8,
    /// Packed permission byte.
    pub permissions: u8,
    /// Owner group id.
    pub gid: u8,
    /// Creation time, Unix seconds.
    pub create_time: u32,
    /// Last modification time, Unix seconds.
    pub modify_time: u32,
    /// Last access time, Unix seconds.
    pub access_time: u32,
}

impl DirEntry {
    /// An empty slot.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            name: [0; 40],
            size: 0,
            start_block: 0,
            attributes: Attributes::empty(),
            uid: 0,
            permissions: 0,
            gid: 0,
            create_time: 0,
            modify_time: 0,
            access_time: 0,
        }
    }

    /// True for tombstones and never-used slots.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    /// True for directories.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    /// True for symbolic links.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.attributes.contains(Attributes::SYMLINK)
    }

    /// The stored filename as text.
    #[must_use]
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_MAX + 1);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    /// Stores a sanitized copy of `name`.
    pub fn set_name(&mut self, name: &str) {
        self.name = [0; 40];
        let mut j = 0;
        for c in name.bytes() {
            if j >= NAME_MAX {
                break;
            }
            if c.is_ascii_alphanumeric()
                || matches!(c, b'.' | b'_' | b'-' | b' ' | b'(' | b')')
            {
                self.name[j] = c;
                j += 1;
            }
        }
        if j == 0 {
            self.name[0] = b'_';
        }
    }

    /// Parses entry `index` from a directory block.
    #[must_use]
    pub fn parse(buf: &[u8; BLOCK_SIZE], index: usize) -> Self {
        let b = &buf[index * DIR_ENTRY_SIZE..(index + 1) * DIR_ENTRY_SIZE];
        let word = |i: usize| u32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        let mut name = [0u8; 40];
        name.copy_from_slice(&b[0..40]);
        Self {
            name,
            size: word(40),
            start_block: word(44),
            attributes: Attributes::from_bits_truncate(b[48]),
            uid: b[49],
            permissions: b[50],
            gid: b[51],
            create_time: word(52),
            modify_time: word(56),
            access_time: word(60),
        }
    }

    /// Serializes this entry into slot `index` of a directory block.
    pub fn store(&self, buf: &mut [u8; BLOCK_SIZE], index: usize) {
        let b = &mut buf[index * DIR_ENTRY_SIZE..(index + 1) * DIR_ENTRY_SIZE];
        b[0..40].copy_from_slice(&self.name);
        b[40..44].copy_from_slice(&self.size.to_le_bytes());
        b[44..48].copy_from_slice(&self.start_block.to_le_bytes());
        b[48] = self.attributes.bits();
        b[49] = self.uid;
        b[50] = self.permissions;
        b[51] = self.gid;
        b[52..56].copy_from_slice(&self.create_time.to_le_bytes());
        b[56..60].copy_from_slice(&self.modify_time.to_le_bytes());
        b[60..64].copy_from_slice(&self.access_time.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_round_trip() {
        let sb = Superblock::create("SYSTEM", 1024);
        let mut buf = [0u8; BLOCK_SIZE];
        sb.write_to(&mut buf);
        let back = Superblock::read_from(&buf);
        assert_eq!(sb, back);
        assert_eq!(back.label(), "SYSTEM");
        assert_eq!(back.fat_blocks, 8);
        assert_eq!(back.data_start_block, 9);
    }

    #[test]
    fn dir_entry_round_trip_preserves_fields() {
        let mut e = DirEntry::empty();
        e.set_name("notes.txt");
        e.size = 1234;
        e.start_block = 42;
        e.attributes = Attributes::ARCHIVE;
        e.uid = 7;
        e.gid = 3;
        e.permissions = PERM_DEFAULT;
        e.create_time = 1_700_000_000;
        e.modify_time = 1_700_000_100;
        e.access_time = 1_700_000_200;

        let mut buf = [0u8; BLOCK_SIZE];
        e.store(&mut buf, 5);
        let back = DirEntry::parse(&buf, 5);
        assert_eq!(e, back);
        assert_eq!(back.name(), "notes.txt");
    }

    #[test]
    fn name_sanitizer_strips_and_truncates() {
        let mut e = DirEntry::empty();
        e.set_name("a/b:c*d.txt");
        assert_eq!(e.name(), "abcd.txt");

        let long = "x".repeat(60);
        e.set_name(&long);
        assert_eq!(e.name().len(), NAME_MAX);

        e.set_name("///");
        assert_eq!(e.name(), "_");
    }

    #[test]
    fn default_permissions_unpack_as_rwxr_xr_x() {
        assert_eq!(PERM_DEFAULT, 0b1111_0111);
    }

    #[test]
    fn permission_matrix() {
        let owner = Cred { uid: 5, gid: 1 };
        let group = Cred { uid: 6, gid: 1 };
        let other = Cred { uid: 7, gid: 2 };
        let perm = PERM_DEFAULT;

        // Root bypasses everything.
        assert!(permits(5, 1, 0, Cred::ROOT, Perm::Write));

        assert!(permits(5, 1, perm, owner, Perm::Write));
        assert!(permits(5, 1, perm, group, Perm::Read));
        assert!(!permits(5, 1, perm, group, Perm::Write));
        assert!(permits(5, 1, perm, other, Perm::Read));
        assert!(permits(5, 1, perm, other, Perm::Exec));
        // World write has no bit in the packed format.
        assert!(!permits(5, 1, perm, other, Perm::Write));

        // Owner match takes precedence over group/world bits.
        let owner_only = pack_perm(0b110, 0, 0);
        assert!(permits(5, 1, owner_only, owner, Perm::Write));
        assert!(!permits(5, 1, owner_only, owner, Perm::Exec));
        assert!(!permits(5, 1, owner_only, group, Perm::Read));
    }
}
