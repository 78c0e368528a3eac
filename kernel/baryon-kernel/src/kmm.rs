//! Kernel memory: the global heap instance and the kernel page
//! directory.
//!
//! The heap is an [`IrqLock`]ed singleton because the timer interrupt
//! can reach the allocator through the network stack's buffers. A
//! `GlobalAlloc` shim lets the rest of the kernel use `alloc`
//! collections on top of it.

use core::alloc::{GlobalAlloc, Layout};

use baryon_core::addr::{PhysAddr, VirtAddr, PAGE_SIZE};
use baryon_core::sync::IrqLock;
use baryon_core::{kinfo, kwarn};
use baryon_mm::heap::Heap;
use baryon_mm::paging::{FrameSource, MapError, PageDirectory, PageFlags, PageTable};

use crate::arch::x86::{apic, enable_paging, write_cr3};

/// Start of the kernel heap region.
const HEAP_START: u32 = 0x0100_0000; // 16 MiB
/// Largest heap the identity map accommodates.
const HEAP_MAX: u32 = 0x02C0_0000; // 44 MiB
/// Identity-mapped span required at boot.
const IDENTITY_SPAN: u32 = 64 * 1024 * 1024;

static HEAP: IrqLock<Option<Heap>> = IrqLock::new(None);

struct DirectoryHolder(*mut PageDirectory);
// SAFETY: The directory is only touched under the lock.
unsafe impl Send for DirectoryHolder {}

static DIRECTORY: IrqLock<Option<DirectoryHolder>> = IrqLock::new(None);

/// Initializes the heap over `[HEAP_START, HEAP_START + len)`.
///
/// # Safety
///
/// The region must be usable RAM not overlapping the kernel image, and
/// this must be called exactly once before any allocation.
pub unsafe fn init(available_kb: u32) {
    let span = (available_kb.saturating_mul(1024)).min(HEAP_MAX);
    let mut guard = HEAP.lock();
    // SAFETY: Caller contract: the region is ours.
    *guard = Some(unsafe { Heap::new(HEAP_START as *mut u8, span as usize) });
    kinfo!("mm: heap at {:#x}, {} KiB", HEAP_START, span / 1024);
}

/// Runs `f` with the heap.
pub fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> R {
    let mut guard = HEAP.lock();
    f(guard.as_mut().expect("heap not initialized"))
}

/// Heap usage for the API table: `(used, total)`.
#[must_use]
pub fn usage() -> (usize, usize) {
    with_heap(|heap| (heap.used(), heap.total()))
}

/// Allocates a zeroed, page-aligned, identity-mapped DMA buffer.
///
/// The buffer is never freed; device rings live for the kernel's
/// lifetime.
pub fn alloc_dma(len: usize) -> Option<&'static mut [u8]> {
    with_heap(|heap| {
        let ptr = heap.alloc_page_aligned(len, None);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: Fresh zeroed allocation of `len` bytes, leaked.
            Some(unsafe { core::slice::from_raw_parts_mut(ptr, len) })
        }
    })
}

/// `GlobalAlloc` over the guarded heap.
struct KernelAllocator;

// SAFETY: Forwards to the locked heap; the heap zeroes and guards every
// block.
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        with_heap(|heap| {
            if layout.align() <= 16 {
                heap.alloc(layout.size())
            } else {
                // Rare over-aligned allocations ride the page-aligned
                // path and are not reclaimed individually.
                heap.alloc_page_aligned(layout.size(), None)
            }
        })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.align() <= 16 {
            with_heap(|heap| {
                let _ = heap.free(ptr);
            });
        }
    }
}

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

/// Frame source backed by the page-aligned heap path.
struct HeapFrames;

impl FrameSource for HeapFrames {
    fn alloc_table(&mut self) -> Option<(*mut PageTable, PhysAddr)> {
        let mut phys = 0u32;
        let ptr = with_heap(|heap| {
            heap.alloc_page_aligned(core::mem::size_of::<PageTable>(), Some(&mut phys))
        });
        if ptr.is_null() {
            None
        } else {
            Some((ptr.cast::<PageTable>(), PhysAddr::new(phys)))
        }
    }
}

/// Builds the kernel directory, identity-maps the first 64 MiB plus the
/// APIC MMIO frames and the framebuffer, loads CR3 and enables paging.
///
/// # Safety
///
/// Must run once, after the heap is up, before the APICs are touched.
pub unsafe fn init_paging(framebuffer: Option<&crate::multiboot::Framebuffer>) {
    let directory: &'static mut PageDirectory = {
        let mut phys = 0u32;
        let ptr = with_heap(|heap| {
            heap.alloc_page_aligned(core::mem::size_of::<PageDirectory>(), Some(&mut phys))
        });
        assert!(!ptr.is_null(), "no memory for the page directory");
        let dir = ptr.cast::<PageDirectory>();
        // SAFETY: Fresh zeroed page-aligned allocation.
        unsafe {
            dir.write(PageDirectory::empty());
            &mut *dir
        }
    };

    let mut frames = HeapFrames;
    let rw = PageFlags::WRITABLE;
    directory
        .map_region(PhysAddr::new(0), VirtAddr::new(0), IDENTITY_SPAN, rw, &mut frames)
        .expect("identity map");
    let mmio = PageFlags::WRITABLE | PageFlags::NO_CACHE;
    for base in [apic::LAPIC_BASE, apic::IOAPIC_BASE] {
        directory
            .map_region(PhysAddr::new(base), VirtAddr::new(base), PAGE_SIZE, mmio, &mut frames)
            .expect("apic map");
    }
    if let Some(fb) = framebuffer {
        let bytes = fb.pitch.saturating_mul(fb.height);
        #[allow(clippy::cast_possible_truncation)]
        let base = fb.addr as u32;
        if directory
            .map_region(PhysAddr::new(base), VirtAddr::new(base), bytes, mmio, &mut frames)
            .is_err()
        {
            kwarn!("mm: framebuffer map failed");
        }
    }

    let cr3 = directory.cr3();
    *DIRECTORY.lock() = Some(DirectoryHolder(directory));
    // SAFETY: The directory identity-maps the kernel; enabling paging
    // keeps every live address valid.
    unsafe {
        write_cr3(cr3.as_u32());
        enable_paging();
    }
    kinfo!("mm: paging on, 0-64 MiB identity mapped");
}

/// Maps an MMIO region on demand (uncached) and reloads CR3.
pub fn map_mmio(phys: u32, bytes: u32) -> Result<(), MapError> {
    let mut guard = DIRECTORY.lock();
    let Some(holder) = guard.as_mut() else {
        return Err(MapError::OutOfFrames);
    };
    // SAFETY: The holder owns the live directory.
    let directory = unsafe { &mut *holder.0 };
    let mut frames = HeapFrames;
    directory.map_region(
        PhysAddr::new(phys),
        VirtAddr::new(phys),
        bytes,
        PageFlags::WRITABLE | PageFlags::NO_CACHE,
        &mut frames,
    )?;
    let cr3 = directory.cr3();
    // SAFETY: Reloading CR3 with the same directory flushes the TLB.
    unsafe { write_cr3(cr3.as_u32()) };
    Ok(())
}
