//! The monotonic timer and the preemption path.
//!
//! The LAPIC timer fires vector 32 at 50 Hz. Each tick bumps the
//! counter, burns scheduler slice, runs the once-a-second network
//! housekeeping, and asks the scheduler for the stack pointer to resume
//! on. That return value is the whole preemption mechanism.

use core::sync::atomic::{AtomicU64, Ordering};

use baryon_net::Clock;

use crate::arch::x86::{apic, halt};

/// Timer frequency.
pub const HZ: u32 = 50;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// The current tick count.
#[must_use]
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Tick source hook for the log timestamps.
pub fn log_tick_source() -> u64 {
    ticks()
}

/// Calibrates and starts the periodic timer on vector 32.
pub fn init() {
    let per_ms = apic::calibrate_timer();
    apic::start_timer(32, per_ms, HZ);
}

/// The vector-32 handler body. Returns the stack pointer for IRET.
pub fn timer_interrupt(esp: u32) -> u32 {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;

    crate::ksched::with(|sched| sched.tick(now));

    // Once a second: ARP sweep and TCP timers.
    if now % u64::from(HZ) == 0 {
        crate::knet::housekeeping(now);
    }

    crate::ksched::with(|sched| sched.schedule(esp))
}

/// Tick clock handed to the network stack's bounded waits.
#[derive(Clone, Copy)]
pub struct KernelClock;

impl Clock for KernelClock {
    fn now(&self) -> u64 {
        ticks()
    }

    fn relax(&self) {
        halt();
    }
}

/// Spins the calling task until `deadline_ticks` have elapsed.
pub fn wait_ticks(count: u64) {
    let deadline = ticks() + count;
    while ticks() < deadline {
        halt();
    }
}
