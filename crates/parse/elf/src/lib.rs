//! ELF32 parsing and loading for Baryon loadable modules.
//!
//! Zero-copy, zero-allocation parsing of 32-bit little-endian ELF files
//! plus the pure loading algorithm for position-independent (`ET_DYN`)
//! images: segment placement into a caller-provided slab, `PT_DYNAMIC`
//! discovery of the relocation tables, and `R_386_*` fixups. Nothing here
//! touches hardware or the allocator, so the whole crate tests on the
//! host.

#![cfg_attr(not(test), no_std)]

mod dynamic;
mod header;
mod image;
mod program;
mod reloc;

pub use dynamic::{DynIter, DynTag, DT_JMPREL, DT_NULL, DT_PLTRELSZ, DT_REL, DT_RELENT, DT_RELSZ};
pub use header::{ElfError, ElfFile, ET_DYN, EM_386};
pub use image::{LoadPlan, LoadedImage};
pub use program::{ProgramHeader, ProgramHeaderIter, PT_DYNAMIC, PT_LOAD};
pub use reloc::{
    compute_x86_reloc, Elf32Rel, RelIter, R_386_32, R_386_NONE, R_386_PC32, R_386_RELATIVE,
};
