//! Spin-based mutual exclusion.
//!
//! Test-and-test-and-set so the spin path loads a shared cache line
//! instead of hammering it with compare-exchanges. Const-constructable so
//! kernel singletons can live in `static` items.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A spin lock protecting a value of type `T`.
pub struct SpinLock<T> {
    held: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: The atomic flag guarantees exclusive access to the inner value;
// `T: Send` because the value may be accessed from different contexts.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new, unlocked lock.
    pub const fn new(value: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is free.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if self
                .held
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinLockGuard { lock: self };
            }
            while self.held.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `None` if the lock is already held. Used on panic paths
    /// where spinning could deadlock against the interrupted holder.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Returns a mutable reference to the inner value, bypassing the lock.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no other context holds or can take the
    /// lock. Last-resort escape hatch for the panic handler.
    pub unsafe fn force_get(&self) -> &mut T {
        unsafe { &mut *self.value.get() }
    }
}

/// RAII guard; the lock is released on drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard holds the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The guard holds the lock.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_relock_after_drop() {
        let lock = SpinLock::new(7);
        {
            let guard = lock.lock();
            assert_eq!(*guard, 7);
        }
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let _guard = lock.lock();
        assert!(lock.try_lock().is_none());
    }

    #[test]
    fn guard_mutation_is_visible() {
        let lock = SpinLock::new(0u32);
        *lock.lock() = 41;
        assert_eq!(*lock.lock(), 41);
    }
}
