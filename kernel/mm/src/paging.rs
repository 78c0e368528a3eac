//! 32-bit two-level page tables.
//!
//! Standard x86 semantics: a 1024-entry directory of 1024-entry tables,
//! 4 KiB pages. The structures are plain data; table frames come from a
//! caller-supplied [`FrameSource`] so the mapper can be exercised on the
//! host with fake frames. Enabling paging and reloading CR3 is the
//! kernel's job, after each [`PageDirectory::map_region`] call.

use baryon_core::addr::{PhysAddr, VirtAddr, PAGE_SIZE};
use bitflags::bitflags;
use core::fmt;
use core::ptr;

bitflags! {
    /// Page table / directory entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Entry maps a frame.
        const PRESENT       = 1 << 0;
        /// Writes allowed.
        const WRITABLE      = 1 << 1;
        /// User-mode access allowed.
        const USER          = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled (MMIO).
        const NO_CACHE      = 1 << 4;
        /// Set by hardware on access.
        const ACCESSED      = 1 << 5;
        /// Set by hardware on write.
        const DIRTY         = 1 << 6;
    }
}

/// One 1024-entry page table.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [u32; 1024],
}

impl PageTable {
    /// An empty table with every entry non-present.
    #[must_use]
    pub const fn empty() -> Self {
        Self { entries: [0; 1024] }
    }
}

/// Source of page-aligned frames for page tables.
///
/// The kernel backs this with the page-aligned heap variant; tests use
/// leaked host allocations. Returned frames must be zeroed, 4 KiB aligned,
/// and live for the lifetime of the directory.
pub trait FrameSource {
    /// Allocates one zeroed table frame, returning the pointer and its
    /// physical address (identical under identity mapping).
    fn alloc_table(&mut self) -> Option<(*mut PageTable, PhysAddr)>;
}

/// Errors from the region mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The frame source ran dry while creating a page table.
    OutOfFrames,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfFrames => f.write_str("out of page-table frames"),
        }
    }
}

/// A page directory plus the kernel-side pointers to its tables.
///
/// `entries` is the hardware view (physical address + flags per table) and
/// is what CR3 points at; `tables` is the software view used to walk and
/// edit the tables.
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [u32; 1024],
    tables: [*mut PageTable; 1024],
}

impl PageDirectory {
    /// An empty directory with no tables.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: [0; 1024],
            tables: [ptr::null_mut(); 1024],
        }
    }

    /// Physical address to load into CR3 (identity mapping assumed).
    #[must_use]
    pub fn cr3(&self) -> PhysAddr {
        PhysAddr::new(self.entries.as_ptr() as usize as u32)
    }

    /// Maps `bytes` bytes starting at `phys`/`virt` with `flags`.
    ///
    /// Both addresses are rounded down to page boundaries and the length
    /// rounded up, matching what the hardware can express. Existing
    /// mappings in the range are overwritten. The caller must reload CR3
    /// afterwards to flush the TLB.
    pub fn map_region(
        &mut self,
        phys: PhysAddr,
        virt: VirtAddr,
        bytes: u32,
        flags: PageFlags,
        frames: &mut dyn FrameSource,
    ) -> Result<(), MapError> {
        let start_virt = virt.page_base().as_u32();
        let start_phys = phys.page_base().as_u32();
        let end = virt
            .as_u32()
            .wrapping_add(bytes)
            .wrapping_add(PAGE_SIZE - 1)
            & !(PAGE_SIZE - 1);
        let pages = (end - start_virt) / PAGE_SIZE;

        for i in 0..pages {
            let v = VirtAddr::new(start_virt + i * PAGE_SIZE);
            let p = start_phys + i * PAGE_SIZE;
            let table = self.table_for(v, frames)?;
            // SAFETY: `table` points to a live PageTable owned by this
            // directory.
            unsafe {
                (*table).entries[v.table_index()] = p | flags.bits() | PageFlags::PRESENT.bits();
            }
        }
        Ok(())
    }

    /// Translates a virtual address through the tables.
    ///
    /// Diagnostic helper; returns `None` for non-present entries.
    #[must_use]
    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let table = self.tables[virt.directory_index()];
        if table.is_null() {
            return None;
        }
        // SAFETY: Non-null table pointers in `tables` are always valid.
        let entry = unsafe { (*table).entries[virt.table_index()] };
        if entry & PageFlags::PRESENT.bits() == 0 {
            return None;
        }
        Some(PhysAddr::new((entry & !0xFFF) | virt.page_offset()))
    }

    /// Returns the table covering `virt`, creating it if needed.
    fn table_for(
        &mut self,
        virt: VirtAddr,
        frames: &mut dyn FrameSource,
    ) -> Result<*mut PageTable, MapError> {
        let dir_idx = virt.directory_index();
        if self.tables[dir_idx].is_null() {
            let (table, table_phys) = frames.alloc_table().ok_or(MapError::OutOfFrames)?;
            self.tables[dir_idx] = table;
            // Directory entries carry permissive flags; the page entries
            // are where access is actually restricted.
            self.entries[dir_idx] = table_phys.as_u32()
                | (PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER).bits();
        }
        Ok(self.tables[dir_idx])
    }
}

/// Decoded page-fault error code (the low bits pushed by the CPU).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFaultCode {
    /// Fault caused by a protection violation (set) or a non-present
    /// page (clear).
    pub protection: bool,
    /// Faulting access was a write.
    pub write: bool,
    /// Faulting access came from user mode.
    pub user: bool,
    /// A reserved bit was set in a paging structure.
    pub reserved: bool,
}

impl PageFaultCode {
    /// Decodes the raw error code from the fault frame.
    #[must_use]
    pub const fn from_bits(code: u32) -> Self {
        Self {
            protection: code & 1 != 0,
            write: code & 2 != 0,
            user: code & 4 != 0,
            reserved: code & 8 != 0,
        }
    }
}

impl fmt::Display for PageFaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} in {} mode{}",
            if self.protection { "protection" } else { "non-present" },
            if self.write { "write" } else { "read" },
            if self.user { "user" } else { "supervisor" },
            if self.reserved { " (reserved bit set)" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame source backed by leaked host allocations.
    struct HostFrames {
        budget: usize,
    }

    impl FrameSource for HostFrames {
        fn alloc_table(&mut self) -> Option<(*mut PageTable, PhysAddr)> {
            if self.budget == 0 {
                return None;
            }
            self.budget -= 1;
            let table = Box::leak(Box::new(PageTable::empty()));
            let addr = (table as *mut PageTable as usize & 0xFFFF_F000) as u32;
            Some((table, PhysAddr::new(addr)))
        }
    }

    #[test]
    fn identity_map_translates() {
        let mut dir = Box::new(PageDirectory::empty());
        let mut frames = HostFrames { budget: 64 };
        dir.map_region(
            PhysAddr::new(0),
            VirtAddr::new(0),
            4 * 1024 * 1024,
            PageFlags::WRITABLE,
            &mut frames,
        )
        .unwrap();
        assert_eq!(
            dir.translate(VirtAddr::new(0x1234)).unwrap().as_u32(),
            0x1234
        );
        assert_eq!(
            dir.translate(VirtAddr::new(0x003F_FFFF)).unwrap().as_u32(),
            0x003F_FFFF
        );
        assert!(dir.translate(VirtAddr::new(0x0040_0000)).is_none());
    }

    #[test]
    fn offset_mapping_translates() {
        let mut dir = Box::new(PageDirectory::empty());
        let mut frames = HostFrames { budget: 4 };
        dir.map_region(
            PhysAddr::new(0xFEE0_0000),
            VirtAddr::new(0xFEE0_0000),
            PAGE_SIZE,
            PageFlags::WRITABLE | PageFlags::NO_CACHE,
            &mut frames,
        )
        .unwrap();
        let got = dir.translate(VirtAddr::new(0xFEE0_0030)).unwrap();
        assert_eq!(got.as_u32(), 0xFEE0_0030);
    }

    #[test]
    fn unaligned_region_is_rounded_to_pages() {
        let mut dir = Box::new(PageDirectory::empty());
        let mut frames = HostFrames { budget: 4 };
        dir.map_region(
            PhysAddr::new(0x5000),
            VirtAddr::new(0x5000),
            1, // a single byte still maps the whole page
            PageFlags::empty(),
            &mut frames,
        )
        .unwrap();
        assert!(dir.translate(VirtAddr::new(0x5FFF)).is_some());
        assert!(dir.translate(VirtAddr::new(0x6000)).is_none());
    }

    #[test]
    fn exhausted_frame_source_reports() {
        let mut dir = Box::new(PageDirectory::empty());
        let mut frames = HostFrames { budget: 0 };
        let err = dir
            .map_region(
                PhysAddr::new(0),
                VirtAddr::new(0),
                PAGE_SIZE,
                PageFlags::empty(),
                &mut frames,
            )
            .unwrap_err();
        assert_eq!(err, MapError::OutOfFrames);
    }

    #[test]
    fn fault_code_decodes() {
        let code = PageFaultCode::from_bits(0b0110);
        assert!(!code.protection);
        assert!(code.write);
        assert!(code.user);
        assert!(!code.reserved);
        assert_eq!(format!("{code}"), "non-present write in user mode");
    }
}
