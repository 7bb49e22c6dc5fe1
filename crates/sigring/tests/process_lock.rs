//! Mutual exclusion across real processes.
//!
//! N forked children each perform I non-atomic increments of a shared
//! counter inside acquire/release; the final value is exact if and only if
//! the lock provides mutual exclusion over the shared mapping.
//!
//! Children run only signal-safe, allocation-free code between `fork` and
//! `_exit`.

use core::cell::UnsafeCell;
use core::mem::size_of;

use sigring::{SharedRegion, SpinLock};

#[repr(C)]
struct Counter {
    lock: SpinLock,
    value: UnsafeCell<u64>,
}

// SAFETY: value is only touched between acquire and release.
unsafe impl Sync for Counter {}

fn wait_child(pid: libc::pid_t) -> i32 {
    let mut status = 0;
    // SAFETY: reaping our own child.
    let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(rc, pid, "waitpid failed");
    assert!(libc::WIFEXITED(status), "child did not exit cleanly");
    libc::WEXITSTATUS(status)
}

#[test]
fn concurrent_increments_are_exact() {
    const CHILDREN: usize = 4;
    const ITERS: u64 = 20_000;

    let region = SharedRegion::anonymous(size_of::<Counter>()).unwrap();
    // SAFETY: fresh region, private to this test until the forks below.
    let counter = unsafe { region.get_mut::<Counter>() };
    counter.lock.init();
    *counter.value.get_mut() = 0;
    let counter: &Counter = counter;

    let mut pids = Vec::with_capacity(CHILDREN);
    for _ in 0..CHILDREN {
        // SAFETY: the child touches only the shared counter and _exits.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            for _ in 0..ITERS {
                let _guard = counter.lock.lock();
                // The critical-region operation: a non-atomic increment.
                // SAFETY: the guard serializes access.
                unsafe { *counter.value.get() += 1 };
            }
            // SAFETY: leave without unwinding into the test harness.
            unsafe { libc::_exit(0) };
        }
        pids.push(pid);
    }

    for pid in pids {
        assert_eq!(wait_child(pid), 0);
    }

    // SAFETY: all children exited; no concurrent access remains.
    let total = unsafe { *counter.value.get() };
    assert_eq!(total, CHILDREN as u64 * ITERS);
    assert!(!counter.lock.is_locked());
}
