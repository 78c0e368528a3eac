//! The Baryon kernel.
//!
//! Composition of the subsystem crates with the bare-metal runtime:
//! Multiboot entry, GDT/IDT and APIC bring-up, the 50 Hz timer that
//! drives preemption, device drivers, the PFS32 volume, the network
//! stack, the CDL module loader, and the kernel API table exported to
//! loaded modules.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(all(target_os = "none", target_arch = "x86"), feature(c_variadic))]

extern crate alloc;

// ── Always-available modules (pure logic, host-testable) ─────────────────

pub mod cdl;
pub mod config;
pub mod input;
pub mod kapi;
pub mod multiboot;
pub mod nicring;
pub mod taskframe;
pub mod windows;

// ── Kernel-runtime modules (require the bare-metal x86 target) ───────────

#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod abi;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod arch;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod boot;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod drivers;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod kfs;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod kmm;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod knet;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod ksched;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod panic;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod time;

#[cfg(all(target_os = "none", target_arch = "x86"))]
pub use boot::kernel_main;
