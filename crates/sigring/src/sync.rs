//! Atomics and spin hints, switchable to loom for model checking.

#[cfg(not(feature = "loom"))]
pub use core::hint::spin_loop;
#[cfg(feature = "loom")]
pub use loom::hint::spin_loop;

#[cfg(not(feature = "loom"))]
pub use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};
#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicI32, AtomicU32, Ordering};

#[cfg(feature = "loom")]
pub use loom::thread;
