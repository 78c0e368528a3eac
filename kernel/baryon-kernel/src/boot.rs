//! Multiboot entry and kernel bring-up.
//!
//! Boot is strictly sequential; the moment the timer starts, everything
//! becomes interrupt-driven and the scheduler owns the CPU.

use baryon_core::log::{set_max_level, set_sink, set_tick_source};
use baryon_core::{kinfo, kwarn};

use crate::arch::x86::{apic, gdt, idt, pic, sti};
use crate::config::KernelConfig;
use crate::drivers::{console, i8042, serial};
use crate::multiboot::{BootInfo, BOOTLOADER_MAGIC};

core::arch::global_asm!(
    r#"
.section .multiboot
.align 4
    .long 0x1BADB002          # magic
    .long 0x00000007          # page-align modules, mem info, video mode
    .long -(0x1BADB002 + 0x00000007)
    .long 0, 0, 0, 0, 0       # address fields (unused, ELF)
    .long 0                   # mode type: linear framebuffer
    .long 1024
    .long 768
    .long 32

.section .bss
.align 16
boot_stack_bottom:
    .skip 65536
boot_stack_top:

.section .text
.global _start
_start:
    cli
    mov esp, offset boot_stack_top
    push ebx                  # multiboot info pointer
    push eax                  # bootloader magic
    call kernel_main
1:  hlt
    jmp 1b
"#
);

/// The Rust entry point, called from `_start`.
///
/// # Safety
///
/// Called exactly once by the boot stub with the Multiboot registers.
#[no_mangle]
pub unsafe extern "C" fn kernel_main(magic: u32, info_addr: u32) -> ! {
    // Early serial first so every later step can log.
    if serial::Serial::init() {
        set_sink(serial::sink);
    }
    set_tick_source(crate::time::log_tick_source);
    kinfo!("baryon: booting");

    if magic != BOOTLOADER_MAGIC {
        kwarn!("boot: unexpected magic {:#x}", magic);
    }

    // SAFETY: The bootloader guarantees the info structure is readable;
    // 128 bytes covers every field the kernel consumes.
    let info_bytes = unsafe { core::slice::from_raw_parts(info_addr as *const u8, 128) };
    let info = BootInfo::parse(info_bytes).unwrap_or(BootInfo {
        mem_upper_kb: None,
        cmdline_addr: None,
        framebuffer: None,
    });

    let cfg = info
        .cmdline_addr
        .map(|addr| {
            // SAFETY: The bootloader NUL-terminates the command line.
            let cmdline = unsafe { cstr_at(addr) };
            KernelConfig::parse(cmdline)
        })
        .unwrap_or_default();
    set_max_level(cfg.log_level);

    // CPU tables, then memory, then interrupts.
    // SAFETY: Single-threaded boot with interrupts disabled.
    unsafe {
        gdt::init();
        pic::remap_and_disable();
        idt::init();

        let mem_kb = info.mem_upper_kb.unwrap_or(32 * 1024);
        crate::kmm::init(mem_kb);
        crate::kmm::init_paging(info.framebuffer.as_ref());
        apic::init();
    }

    console::init(info.framebuffer);
    set_sink(console::sink);

    crate::ksched::init();
    i8042::init();
    crate::kfs::init();
    crate::knet::init(&cfg);

    crate::time::init();
    // SAFETY: Every handler is installed; preemption may begin.
    unsafe { sti() };
    kinfo!("baryon: up, starting system module");

    // Hand the machine to userland: the init module drives everything
    // else (compositor, desktop, applications) through the API table.
    match crate::abi::load_module("/System/init.cdl") {
        Ok(_) => kinfo!("boot: init module running"),
        Err(e) => kwarn!("boot: no init module ({}); idling", e),
    }

    // This boot context becomes the lowest-priority maintenance loop.
    loop {
        crate::knet::drain_nic();
        crate::arch::x86::halt();
    }
}

/// Reads a NUL-terminated string at a physical address (identity
/// mapped), bounded to 256 bytes.
///
/// # Safety
///
/// `addr` must point at readable memory containing a terminator within
/// the bound.
unsafe fn cstr_at(addr: u32) -> &'static str {
    // SAFETY: Caller contract.
    let bytes = unsafe { core::slice::from_raw_parts(addr as *const u8, 256) };
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(0);
    core::str::from_utf8(&bytes[..len]).unwrap_or("")
}
