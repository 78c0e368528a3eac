//! ELF32 file header parsing and validation.

use core::fmt;

use crate::program::{ProgramHeaderIter, ELF32_PHDR_SIZE};

/// Shared object / position-independent executable.
pub const ET_DYN: u16 = 3;
/// Intel 80386 machine type.
pub const EM_386: u16 = 3;

/// Size of the ELF32 file header.
const ELF32_EHDR_SIZE: usize = 52;

/// Little-endian `u16` accessor.
pub(crate) fn le_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Little-endian `u32` accessor.
pub(crate) fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Errors produced while parsing or loading an ELF image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// Missing or wrong magic / class / endianness.
    NotElf,
    /// The file is not a 32-bit `ET_DYN` for the i386.
    UnsupportedType,
    /// A header or table lies outside the file bounds.
    Truncated,
    /// A relocation table is malformed (bad entry size or target).
    BadRelocation,
    /// The provided slab cannot hold the image.
    SlabTooSmall,
    /// The image has no loadable segments.
    NoLoadSegments,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotElf => f.write_str("not a 32-bit little-endian ELF"),
            Self::UnsupportedType => f.write_str("not an i386 ET_DYN object"),
            Self::Truncated => f.write_str("structure exceeds file bounds"),
            Self::BadRelocation => f.write_str("malformed relocation table"),
            Self::SlabTooSmall => f.write_str("image slab too small"),
            Self::NoLoadSegments => f.write_str("no PT_LOAD segments"),
        }
    }
}

/// A validated view over the bytes of an ELF32 file.
#[derive(Clone, Copy)]
pub struct ElfFile<'a> {
    data: &'a [u8],
    /// Entry point virtual address.
    pub e_entry: u32,
    /// File offset of the program header table.
    pub e_phoff: u32,
    /// Number of program headers.
    pub e_phnum: u16,
}

impl<'a> ElfFile<'a> {
    /// Parses and validates the file header.
    ///
    /// Accepts only 32-bit little-endian `ET_DYN` objects for `EM_386`,
    /// which is the only module format the kernel loads.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        if data.len() < ELF32_EHDR_SIZE {
            return Err(ElfError::NotElf);
        }
        if &data[0..4] != b"\x7fELF" {
            return Err(ElfError::NotElf);
        }
        // EI_CLASS = ELFCLASS32, EI_DATA = ELFDATA2LSB.
        if data[4] != 1 || data[5] != 1 {
            return Err(ElfError::NotElf);
        }
        let e_type = le_u16(data, 16);
        let e_machine = le_u16(data, 18);
        if e_type != ET_DYN || e_machine != EM_386 {
            return Err(ElfError::UnsupportedType);
        }

        let e_entry = le_u32(data, 24);
        let e_phoff = le_u32(data, 28);
        let e_phnum = le_u16(data, 44);
        let e_phentsize = le_u16(data, 42);
        if e_phentsize as usize != ELF32_PHDR_SIZE {
            return Err(ElfError::Truncated);
        }
        let table_end = e_phoff as usize + e_phnum as usize * ELF32_PHDR_SIZE;
        if table_end > data.len() {
            return Err(ElfError::Truncated);
        }

        Ok(Self {
            data,
            e_entry,
            e_phoff,
            e_phnum,
        })
    }

    /// The raw file bytes.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Iterates the program headers.
    #[must_use]
    pub fn program_headers(&self) -> ProgramHeaderIter<'a> {
        ProgramHeaderIter::new(self.data, self.e_phoff as usize, self.e_phnum as usize)
    }
}
