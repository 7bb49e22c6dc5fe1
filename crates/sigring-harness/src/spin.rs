//! Mutual-exclusion check: forked children hammer a shared counter.
//!
//! Each child performs `iters` non-atomic increments of one shared word,
//! taking the lock around every increment. The final value equals
//! `children * iters` exactly if and only if acquire/release provide mutual
//! exclusion across the processes.

use core::cell::UnsafeCell;
use core::mem::size_of;

use sigring::{SharedRegion, SpinLock};

/// One lock and one counter, shared by every child.
#[repr(C)]
struct SpinCounter {
    lock: SpinLock,
    value: UnsafeCell<u64>,
}

// SAFETY: value is only mutated between acquire and release.
unsafe impl Sync for SpinCounter {}

pub fn run(children: u32, iters: u64) -> bool {
    tracing::info!(children, iters, "starting mutual-exclusion check");

    let region =
        SharedRegion::anonymous(size_of::<SpinCounter>()).expect("failed to map shared region");
    // SAFETY: the region is fresh and private to this process until the
    // forks below.
    let counter = unsafe { region.get_mut::<SpinCounter>() };
    counter.lock.init();
    *counter.value.get_mut() = 0;
    let counter: &SpinCounter = counter;

    let mut pids = Vec::with_capacity(children as usize);
    for _ in 0..children {
        // SAFETY: the child touches only the shared counter and _exits.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            for _ in 0..iters {
                let _guard = counter.lock.lock();
                // The critical-region operation: a non-atomic increment.
                // SAFETY: the guard serializes access.
                unsafe { *counter.value.get() += 1 };
            }
            // SAFETY: leave without unwinding into the parent's state.
            unsafe { libc::_exit(0) };
        }
        pids.push(pid);
    }

    for pid in pids {
        let mut status = 0;
        // SAFETY: reaping our own children.
        unsafe { libc::waitpid(pid, &mut status, 0) };
    }

    // SAFETY: all children have exited; no concurrent access remains.
    let total = unsafe { *counter.value.get() };
    let expected = children as u64 * iters;
    if total == expected {
        tracing::info!(total, "counter exact; mutual exclusion holds");
        true
    } else {
        tracing::error!(total, expected, "counter off; mutual exclusion violated");
        false
    }
}
