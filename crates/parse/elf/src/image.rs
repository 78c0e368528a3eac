//! Position-independent image loading.
//!
//! The loading algorithm for `ET_DYN` modules: compute the occupied
//! virtual range over the `PT_LOAD` segments, place the segments into a
//! caller-provided slab (the kernel hands in a page-aligned heap block),
//! then patch every `Rel` entry reachable through `PT_DYNAMIC` by the
//! load delta. All arithmetic is explicit wrapping `u32`; no pointers.

use crate::dynamic::{DynIter, DT_JMPREL, DT_PLTRELSZ, DT_REL, DT_RELENT, DT_RELSZ};
use crate::header::{le_u32, ElfError, ElfFile};
use crate::program::{PT_DYNAMIC, PT_LOAD};
use crate::reloc::{compute_x86_reloc, RelIter, ELF32_REL_SIZE};

/// The virtual range `PT_LOAD` segments occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPlan {
    /// Lowest `p_vaddr` over the load segments.
    pub min_vaddr: u32,
    /// Highest `p_vaddr + p_memsz` over the load segments.
    pub max_vaddr: u32,
}

impl LoadPlan {
    /// Computes the plan for a parsed file.
    pub fn compute(elf: &ElfFile<'_>) -> Result<Self, ElfError> {
        let mut min_vaddr = u32::MAX;
        let mut max_vaddr = 0u32;
        for phdr in elf.program_headers().filter(|p| p.p_type == PT_LOAD) {
            min_vaddr = min_vaddr.min(phdr.p_vaddr);
            max_vaddr = max_vaddr.max(phdr.p_vaddr.wrapping_add(phdr.p_memsz));
        }
        if min_vaddr == u32::MAX || max_vaddr <= min_vaddr {
            return Err(ElfError::NoLoadSegments);
        }
        Ok(Self {
            min_vaddr,
            max_vaddr,
        })
    }

    /// Bytes of slab the image needs.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.max_vaddr - self.min_vaddr
    }
}

/// Result of a successful [`LoadedImage::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    /// Bytes of the slab the image occupies.
    pub size: u32,
    /// Offset of the entry function within the slab.
    pub entry_offset: u32,
    /// Relocations with types the loader does not know; logged by the
    /// caller.
    pub skipped_relocs: u32,
}

impl LoadedImage {
    /// Loads `file` into `slab`, which the kernel will map at `slab_base`.
    ///
    /// Copies each `PT_LOAD` segment to `slab[p_vaddr - min_vaddr..]`,
    /// zero-fills up to `p_memsz`, and applies the `DT_REL` and
    /// `DT_JMPREL` tables with delta `slab_base - min_vaddr`. The slab
    /// must be at least [`LoadPlan::size`] bytes.
    pub fn load(file: &[u8], slab: &mut [u8], slab_base: u32) -> Result<Self, ElfError> {
        let elf = ElfFile::parse(file)?;
        let plan = LoadPlan::compute(&elf)?;
        let size = plan.size() as usize;
        if slab.len() < size {
            return Err(ElfError::SlabTooSmall);
        }
        slab[..size].fill(0);

        // Place the segments.
        for phdr in elf.program_headers().filter(|p| p.p_type == PT_LOAD) {
            let file_start = phdr.p_offset as usize;
            let file_end = file_start
                .checked_add(phdr.p_filesz as usize)
                .ok_or(ElfError::Truncated)?;
            if file_end > file.len() {
                return Err(ElfError::Truncated);
            }
            let dst = (phdr.p_vaddr - plan.min_vaddr) as usize;
            if dst + phdr.p_memsz as usize > size {
                return Err(ElfError::Truncated);
            }
            slab[dst..dst + phdr.p_filesz as usize].copy_from_slice(&file[file_start..file_end]);
            // `p_memsz` beyond `p_filesz` stays zero from the fill above.
        }

        // Collect relocation table locations from PT_DYNAMIC.
        let mut rel: Option<u32> = None;
        let mut relsz = 0u32;
        let mut jmprel: Option<u32> = None;
        let mut pltrelsz = 0u32;
        if let Some(dynamic) = elf.program_headers().find(|p| p.p_type == PT_DYNAMIC) {
            let start = dynamic.p_offset as usize;
            let end = start + dynamic.p_filesz as usize;
            if end > file.len() {
                return Err(ElfError::Truncated);
            }
            for tag in DynIter::new(file, start, end) {
                match tag.tag {
                    DT_REL => rel = Some(tag.value),
                    DT_RELSZ => relsz = tag.value,
                    DT_RELENT => {
                        if tag.value as usize != ELF32_REL_SIZE {
                            return Err(ElfError::BadRelocation);
                        }
                    }
                    DT_JMPREL => jmprel = Some(tag.value),
                    DT_PLTRELSZ => pltrelsz = tag.value,
                    _ => {}
                }
            }
        }

        let delta = slab_base.wrapping_sub(plan.min_vaddr);
        let mut skipped = 0u32;
        for (table, table_size) in [(rel, relsz), (jmprel, pltrelsz)] {
            let Some(table_vaddr) = table else { continue };
            skipped += apply_table(slab, size, plan.min_vaddr, table_vaddr, table_size, delta)?;
        }

        if elf.e_entry < plan.min_vaddr || elf.e_entry >= plan.max_vaddr {
            return Err(ElfError::Truncated);
        }

        #[allow(clippy::cast_possible_truncation)]
        let size = size as u32;
        Ok(Self {
            size,
            entry_offset: elf.e_entry - plan.min_vaddr,
            skipped_relocs: skipped,
        })
    }
}

/// Applies one relocation table found inside the loaded slab.
fn apply_table(
    slab: &mut [u8],
    image_size: usize,
    min_vaddr: u32,
    table_vaddr: u32,
    table_size: u32,
    delta: u32,
) -> Result<u32, ElfError> {
    let start = table_vaddr.wrapping_sub(min_vaddr) as usize;
    let end = start
        .checked_add(table_size as usize)
        .ok_or(ElfError::BadRelocation)?;
    if end > image_size {
        return Err(ElfError::BadRelocation);
    }

    // The table itself lives in a loaded segment; snapshot the entries
    // before patching so a pathological self-referencing table cannot
    // shift under us.
    let mut skipped = 0u32;
    let mut offset = start;
    while offset + ELF32_REL_SIZE <= end {
        let entry_bytes: [u8; ELF32_REL_SIZE] =
            slab[offset..offset + ELF32_REL_SIZE].try_into().unwrap_or_default();
        let mut one = RelIter::new(&entry_bytes, 0, ELF32_REL_SIZE);
        let Some(rel) = one.next() else { break };

        let target = rel.r_offset.wrapping_sub(min_vaddr) as usize;
        if target + 4 > image_size {
            return Err(ElfError::BadRelocation);
        }
        let current = le_u32(slab, target);
        match compute_x86_reloc(rel.r_type, current, delta) {
            Some(patched) => slab[target..target + 4].copy_from_slice(&patched.to_le_bytes()),
            None => skipped += 1,
        }
        offset += ELF32_REL_SIZE;
    }
    Ok(skipped)
}
