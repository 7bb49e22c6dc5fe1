//! Busy-wait mutual exclusion over a shared test-and-set word.
//!
//! [`SpinLock`] is the leaf primitive: acquisition retries an atomic swap in a
//! tight loop and never suspends, so it is only suitable for very short
//! critical sections. The lock word lives in shared memory and is coherent
//! across every process mapping the region, which is all the guarantee the
//! mutual-exclusion argument needs.

use crate::signal;
use crate::sync::{spin_loop, AtomicI32, AtomicU32, Ordering};

/// A process-shared spinlock.
///
/// The layout is part of the shared-memory contract: a test-and-set word
/// followed by the pid of the last acquirer. The owner field is diagnostic
/// only and never consulted for correctness.
#[repr(C)]
pub struct SpinLock {
    /// Test-and-set word: 0 = free, 1 = held.
    locked: AtomicU32,
    /// Pid of the current (or most recent) holder.
    owner: AtomicI32,
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(core::mem::size_of::<SpinLock>() == 8);

impl SpinLock {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self {
            locked: AtomicU32::new(0),
            owner: AtomicI32::new(0),
        }
    }

    /// Reset to the unlocked state.
    ///
    /// For placement inside a shared record before concurrent access starts;
    /// must not run while any participant holds or is acquiring the lock.
    pub fn init(&mut self) {
        self.locked = AtomicU32::new(0);
        self.owner = AtomicI32::new(0);
    }

    /// Spin until the test-and-set wins.
    ///
    /// At most one participant observes the 0 -> 1 transition at a time; the
    /// spin is unbounded and the caller never suspends.
    pub fn acquire(&self) {
        while self.locked.swap(1, Ordering::Acquire) != 0 {
            spin_loop();
        }
        self.owner.store(signal::pid(), Ordering::Relaxed);
    }

    /// Release the lock.
    ///
    /// The caller must currently hold it; releasing an unheld lock is caller
    /// misuse and is rejected rather than left to corrupt shared state.
    pub fn release(&self) {
        self.owner.store(0, Ordering::Relaxed);
        let prev = self.locked.swap(0, Ordering::Release);
        assert!(prev == 1, "release of a lock that was not held");
    }

    /// Acquire and return a guard that releases on drop.
    pub fn lock(&self) -> SpinGuard<'_> {
        self.acquire();
        SpinGuard { lock: self }
    }

    /// Whether the lock word is currently set.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed) != 0
    }

    /// Pid recorded by the current or most recent holder.
    #[inline]
    pub fn owner(&self) -> libc::pid_t {
        self.owner.load(Ordering::Relaxed)
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`SpinLock::lock`]; releases the lock when dropped.
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use core::cell::UnsafeCell;
    use std::sync::Arc;

    struct Counter {
        lock: SpinLock,
        value: UnsafeCell<u64>,
    }

    // SAFETY: value is only touched between acquire and release.
    unsafe impl Sync for Counter {}

    #[test]
    fn guard_round_trip() {
        let lock = SpinLock::new();
        assert!(!lock.is_locked());
        {
            let _guard = lock.lock();
            assert!(lock.is_locked());
            assert_eq!(lock.owner(), signal::pid());
        }
        assert!(!lock.is_locked());
        assert_eq!(lock.owner(), 0);
    }

    #[test]
    #[should_panic(expected = "not held")]
    fn release_unheld_is_rejected() {
        let lock = SpinLock::new();
        lock.release();
    }

    #[test]
    fn threads_increment_exactly() {
        const THREADS: usize = 4;
        const ITERS: u64 = 50_000;

        let counter = Arc::new(Counter {
            lock: SpinLock::new(),
            value: UnsafeCell::new(0),
        });

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..ITERS {
                        let _guard = counter.lock.lock();
                        // SAFETY: the guard serializes access.
                        unsafe { *counter.value.get() += 1 };
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // SAFETY: all writers joined.
        assert_eq!(unsafe { *counter.value.get() }, THREADS as u64 * ITERS);
    }
}
