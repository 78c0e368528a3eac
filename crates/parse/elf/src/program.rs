//! ELF32 program header parsing.

use crate::header::le_u32;

/// Loadable segment.
pub const PT_LOAD: u32 = 1;
/// Dynamic linking information.
pub const PT_DYNAMIC: u32 = 2;

/// Size of an ELF32 program header entry.
pub(crate) const ELF32_PHDR_SIZE: usize = 32;

/// A parsed ELF32 program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Segment type (`PT_*`).
    pub p_type: u32,
    /// File offset of the segment contents.
    pub p_offset: u32,
    /// Virtual address the segment wants to occupy.
    pub p_vaddr: u32,
    /// Bytes of segment content present in the file.
    pub p_filesz: u32,
    /// Bytes the segment occupies in memory (`>= p_filesz`; the
    /// remainder is zero-filled).
    pub p_memsz: u32,
    /// Segment flags (unused by the loader; modules run supervisor).
    pub p_flags: u32,
}

impl ProgramHeader {
    fn parse(data: &[u8], offset: usize) -> Self {
        Self {
            p_type: le_u32(data, offset),
            p_offset: le_u32(data, offset + 4),
            p_vaddr: le_u32(data, offset + 8),
            // p_paddr at +12 is ignored.
            p_filesz: le_u32(data, offset + 16),
            p_memsz: le_u32(data, offset + 20),
            p_flags: le_u32(data, offset + 24),
        }
    }
}

/// Iterator over the program header table.
pub struct ProgramHeaderIter<'a> {
    data: &'a [u8],
    offset: usize,
    remaining: usize,
}

impl<'a> ProgramHeaderIter<'a> {
    pub(crate) fn new(data: &'a [u8], offset: usize, count: usize) -> Self {
        Self {
            data,
            offset,
            remaining: count,
        }
    }
}

impl Iterator for ProgramHeaderIter<'_> {
    type Item = ProgramHeader;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.offset + ELF32_PHDR_SIZE > self.data.len() {
            return None;
        }
        let phdr = ProgramHeader::parse(self.data, self.offset);
        self.offset += ELF32_PHDR_SIZE;
        self.remaining -= 1;
        Some(phdr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ElfFile;
    use crate::image::tests::minimal_image;

    #[test]
    fn finds_load_and_dynamic_segments() {
        let img = minimal_image(&[(8, 0x1111_1111)], 0);
        let elf = ElfFile::parse(&img).unwrap();
        let types: Vec<u32> = elf.program_headers().map(|p| p.p_type).collect();
        assert!(types.contains(&PT_LOAD));
        assert!(types.contains(&PT_DYNAMIC));
    }

    #[test]
    fn memsz_covers_filesz() {
        let img = minimal_image(&[], 0);
        let elf = ElfFile::parse(&img).unwrap();
        for phdr in elf.program_headers().filter(|p| p.p_type == PT_LOAD) {
            assert!(phdr.p_memsz >= phdr.p_filesz);
        }
    }
}
