//! Global descriptor table.
//!
//! Five flat 4 GiB descriptors: null, kernel code/data, user code/data.
//! The user descriptors are present for completeness of the layout but
//! nothing in the core runs ring 3.

use core::arch::asm;

/// Kernel code selector.
pub const KERNEL_CODE: u16 = 0x08;
/// Kernel data selector.
pub const KERNEL_DATA: u16 = 0x10;

/// One 8-byte segment descriptor.
#[repr(C)]
#[derive(Clone, Copy)]
struct Descriptor(u64);

impl Descriptor {
    /// Builds a flat 4 GiB descriptor with the given access byte.
    const fn flat(access: u8) -> Self {
        // base 0, limit 0xFFFFF, granularity 4K, 32-bit.
        let limit_low = 0xFFFFu64;
        let access = (access as u64) << 40;
        let flags_limit_high = 0xCFu64 << 48;
        Self(limit_low | access | flags_limit_high)
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

static GDT: [Descriptor; 5] = [
    Descriptor(0),
    Descriptor::flat(0x9A), // kernel code: present, ring 0, exec/read
    Descriptor::flat(0x92), // kernel data: present, ring 0, read/write
    Descriptor::flat(0xFA), // user code: ring 3
    Descriptor::flat(0xF2), // user data: ring 3
];

/// Loads the GDT and reloads every segment register.
///
/// # Safety
///
/// Must run with interrupts disabled, once, during early boot.
pub unsafe fn init() {
    let pointer = GdtPointer {
        limit: (core::mem::size_of_val(&GDT) - 1) as u16,
        base: GDT.as_ptr() as u32,
    };
    // SAFETY: The pointer describes a static table; the far jump
    // reloads CS with the new kernel code selector.
    unsafe {
        asm!(
            "lgdt [{ptr}]",
            "mov ax, {data}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "push {code}",
            "mov eax, offset 2f",
            "push eax",
            "retf",
            "2:",
            ptr = in(reg) &pointer,
            data = const KERNEL_DATA as u32,
            code = const KERNEL_CODE as u32,
            out("eax") _,
        );
    }
}
