//! Process-shared synchronization built from two low-level mechanisms: an
//! atomic test-and-set word and asynchronous process signals.
//!
//! The crate provides a fixed-capacity FIFO of `u64` data words that lives in
//! a shared memory region and is used concurrently by cooperating processes.
//! No OS semaphore or condition variable is involved: mutual exclusion comes
//! from a busy-wait [`SpinLock`], and blocking on a full or empty queue is
//! synthesized from `sigsuspend` plus a wake signal delivered with `kill`.
//!
//! # Primitives
//!
//! - [`SpinLock`]: busy-wait mutual exclusion over a shared lock word
//! - [`Fifo`] / [`FifoShared`]: bounded producer/consumer ring with a
//!   signal-based block/wake protocol
//! - [`SharedRegion`]: anonymous `MAP_SHARED` mapping created before `fork`
//!
//! # Usage shape
//!
//! One participant maps a region and calls [`Fifo::init`] exactly once, before
//! any concurrency. Processes forked afterwards inherit the mapping and call
//! [`Fifo::enqueue`] / [`Fifo::dequeue`] from their own address spaces; both
//! block (without spinning) until the queue has room or data.
//!
//! # Loom Testing
//!
//! Enable the `loom` feature to model-check the lock across all thread
//! interleavings. The signal protocol is process-level and outside loom's
//! model, so restrict the run to the library tests:
//!
//! ```text
//! cargo test -p sigring --lib --features loom
//! ```

pub mod fifo;
pub mod lock;
pub mod region;
pub mod signal;
pub mod sync;

pub use fifo::{Fifo, FifoError, FifoShared, FifoStatus, LayoutError, QueueFull, MAX_WAITERS};
pub use lock::{SpinGuard, SpinLock};
pub use region::SharedRegion;

#[cfg(all(test, feature = "loom"))]
mod loom_tests;
