//! The terminal failure path.
//!
//! Every panic paints the screen, writes one diagnostic line to the
//! serial log, and halts with interrupts disabled. There is no
//! unwinding anywhere in the kernel.

use core::panic::PanicInfo;

use baryon_core::kfatal;

use crate::arch::x86::{cli, halt};
use crate::drivers::console;

/// Halts the machine after a fatal subsystem error.
pub fn panic_halt(reason: &str) -> ! {
    // SAFETY: Terminal path; nothing runs after this.
    unsafe { cli() };
    kfatal!("panic: {}", reason);
    console::panic_screen();
    loop {
        halt();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    // SAFETY: Terminal path.
    unsafe { cli() };
    kfatal!("panic: {}", info);
    console::panic_screen();
    loop {
        halt();
    }
}
