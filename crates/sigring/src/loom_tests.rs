#![cfg(all(test, feature = "loom"))]

//! Loom models for the lock.
//!
//! The signal-based wait protocol spans processes and is outside loom's
//! model; these tests pin down the lock itself across all interleavings.

use loom::cell::UnsafeCell;
use loom::sync::Arc;

use crate::lock::SpinLock;
use crate::sync::thread;

struct Counter {
    lock: SpinLock,
    value: UnsafeCell<u32>,
}

// SAFETY: value is only accessed between acquire and release.
unsafe impl Sync for Counter {}

#[test]
fn spinlock_mutual_exclusion() {
    loom::model(|| {
        let counter = Arc::new(Counter {
            lock: SpinLock::new(),
            value: UnsafeCell::new(0),
        });

        let other = counter.clone();
        let handle = thread::spawn(move || {
            for _ in 0..2 {
                let _guard = other.lock.lock();
                other.value.with_mut(|p| unsafe { *p += 1 });
            }
        });

        for _ in 0..2 {
            let _guard = counter.lock.lock();
            counter.value.with_mut(|p| unsafe { *p += 1 });
        }

        handle.join().unwrap();

        let _guard = counter.lock.lock();
        counter.value.with_mut(|p| assert_eq!(unsafe { *p }, 4));
    });
}

#[test]
fn spinlock_release_hands_over() {
    loom::model(|| {
        let lock = Arc::new(SpinLock::new());

        let contender = lock.clone();
        let handle = thread::spawn(move || {
            let _guard = contender.lock();
        });

        {
            let _guard = lock.lock();
        }

        handle.join().unwrap();
        assert!(!lock.is_locked());
    });
}
