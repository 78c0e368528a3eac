//! Synchronization primitives for a uniprocessor kernel.

mod irq;
mod spinlock;

pub use irq::{with_irqs_disabled, IrqLock, IrqLockGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
