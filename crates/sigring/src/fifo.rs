//! The bounded concurrent queue and its shared-memory layout.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  FifoHeader (64 bytes: magic, version, configuration)  │
//! ├────────────────────────────────────────────────────────┤
//! │  SpinLock (test-and-set word + owner pid)              │
//! ├────────────────────────────────────────────────────────┤
//! │  FifoState (head, tail, count, wait-list)              │
//! ├────────────────────────────────────────────────────────┤
//! │  Ring storage (CAP x u64)                              │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! One record lives at the start of a [`SharedRegion`] and is initialized
//! exactly once, by exactly one participant, before any concurrent access.
//! Everything below the header is guarded by the embedded [`SpinLock`]; the
//! one exception is the window in which a registered waiter has released the
//! lock and sits suspended awaiting the wake signal.
//!
//! # Blocking protocol
//!
//! A participant that finds the queue full (or empty) blocks the wake signal,
//! appends its pid to the wait-list, releases the lock, and suspends with the
//! saved mask restored atomically (`sigsuspend`). Whoever next completes an
//! operation sends the wake signal to every listed pid and clears the list:
//! a broadcast, because not-full and not-empty waiters share the single list.
//! Woken participants re-acquire the lock and re-check their condition, so a
//! stale wake costs one loop iteration and nothing else.

use core::cell::UnsafeCell;
use core::mem::size_of;
use std::io;

use crate::lock::SpinLock;
use crate::region::SharedRegion;
use crate::signal::{self, BlockedWake};

/// Magic bytes identifying an initialized queue record.
pub const MAGIC: [u8; 8] = *b"SIGRING\0";

/// Layout version (major in the high 16 bits, minor in the low 16).
pub const LAYOUT_VERSION: u32 = 1 << 16;

/// Fixed maximum number of simultaneously blocked participants.
pub const MAX_WAITERS: usize = 64;

/// Queue header (64 bytes).
///
/// Written once by [`Fifo::init`] before any concurrent access and validated
/// by [`Fifo::attach`]; every participant must observe the same layout before
/// its first queue call.
#[repr(C)]
pub struct FifoHeader {
    /// Magic bytes: `b"SIGRING\0"`.
    pub magic: [u8; 8],
    /// Layout version (major.minor packed).
    pub version: u32,
    /// Ring capacity in data words.
    pub capacity: u32,
    /// Wait-list length limit.
    pub max_waiters: u32,
    /// Width of one data word in bytes.
    pub word_size: u32,
    _pad: [u8; 40],
}

const _: () = assert!(size_of::<FifoHeader>() == 64);

/// Mutable queue state. Guarded by the embedded lock.
#[repr(C)]
struct FifoState {
    /// Next slot to read.
    head: u32,
    /// Next slot to write.
    tail: u32,
    /// Items currently stored. Maintained directly, never derived.
    count: u32,
    /// Occupied wait-list entries.
    waiters: u32,
    /// Pids of blocked participants.
    waitlist: [libc::pid_t; MAX_WAITERS],
}

/// The process-shared queue record; see the module docs for the layout.
#[repr(C, align(64))]
pub struct FifoShared<const CAP: usize> {
    header: FifoHeader,
    lock: SpinLock,
    state: UnsafeCell<FifoState>,
    buf: UnsafeCell<[u64; CAP]>,
}

// SAFETY: all mutable state is reached only while holding `lock`, whose
// acquire/release ordering publishes writes between participants.
unsafe impl<const CAP: usize> Sync for FifoShared<CAP> {}

impl<const CAP: usize> FifoShared<CAP> {
    /// Bytes of shared memory required for one queue record.
    pub const fn region_size() -> usize {
        size_of::<Self>()
    }
}

/// Handle to a queue record placed in a shared region.
///
/// Obtained from [`Fifo::init`] (exactly once, pre-fork) or [`Fifo::attach`].
/// The handle itself is per-process and cheap; all state lives in the region,
/// so a handle created before `fork` works unchanged in every child.
pub struct Fifo<'r, const CAP: usize> {
    shared: &'r FifoShared<CAP>,
}

impl<const CAP: usize> std::fmt::Debug for Fifo<'_, CAP> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fifo")
            .field("capacity", &CAP)
            .finish_non_exhaustive()
    }
}

impl<'r, const CAP: usize> Fifo<'r, CAP> {
    /// Bytes of shared memory required for one queue record.
    pub const fn region_size() -> usize {
        FifoShared::<CAP>::region_size()
    }

    fn check_region(region: &SharedRegion) -> Result<(), LayoutError> {
        const {
            assert!(CAP > 0, "capacity must be nonzero");
            assert!(CAP <= u32::MAX as usize, "capacity must fit in u32");
        }
        let required = Self::region_size();
        if required > region.len() {
            return Err(LayoutError::RegionTooSmall {
                required,
                found: region.len(),
            });
        }
        Ok(())
    }

    /// Initialize the record in `region` and return a handle.
    ///
    /// Must be called exactly once, by exactly one participant, before any
    /// concurrent access starts. A record that already carries the magic is
    /// rejected rather than re-initialized under live traffic.
    pub fn init(region: &'r SharedRegion) -> Result<Self, LayoutError> {
        Self::check_region(region)?;

        {
            // SAFETY: size and alignment were checked; initialization is
            // pre-concurrency by contract, so the exclusive borrow cannot
            // alias another participant's view.
            let shared = unsafe { region.get_mut::<FifoShared<CAP>>() };
            if shared.header.magic == MAGIC {
                return Err(LayoutError::AlreadyInitialized);
            }

            shared.lock.init();
            let state = shared.state.get_mut();
            state.head = 0;
            state.tail = 0;
            state.count = 0;
            state.waiters = 0;
            state.waitlist = [0; MAX_WAITERS];
            // Ring storage is never read before being written; leave as mapped.

            shared.header = FifoHeader {
                magic: MAGIC,
                version: LAYOUT_VERSION,
                capacity: CAP as u32,
                max_waiters: MAX_WAITERS as u32,
                word_size: size_of::<u64>() as u32,
                _pad: [0; 40],
            };
        }

        tracing::debug!(capacity = CAP, "queue record initialized");
        // SAFETY: just initialized; all further mutation goes through the lock.
        Ok(Self {
            shared: unsafe { region.get::<FifoShared<CAP>>() },
        })
    }

    /// Attach to an already-initialized record in `region`.
    ///
    /// Validates the header contract: magic (operations before `init` are
    /// detected here), layout version, and configuration agreement with this
    /// instantiation.
    pub fn attach(region: &'r SharedRegion) -> Result<Self, LayoutError> {
        Self::check_region(region)?;

        // SAFETY: size and alignment were checked; concurrent mutation is
        // confined to the UnsafeCell interior and the atomics in the lock.
        let shared = unsafe { region.get::<FifoShared<CAP>>() };
        let header = &shared.header;
        if header.magic != MAGIC {
            return Err(LayoutError::InvalidMagic);
        }
        if header.version >> 16 != LAYOUT_VERSION >> 16 {
            return Err(LayoutError::IncompatibleVersion {
                expected: LAYOUT_VERSION,
                found: header.version,
            });
        }
        if header.capacity as usize != CAP {
            return Err(LayoutError::ConfigMismatch(
                "capacity does not match the initialized record",
            ));
        }
        if header.max_waiters as usize != MAX_WAITERS {
            return Err(LayoutError::ConfigMismatch(
                "wait-list limit does not match the initialized record",
            ));
        }
        if header.word_size as usize != size_of::<u64>() {
            return Err(LayoutError::ConfigMismatch(
                "data word width does not match the initialized record",
            ));
        }
        Ok(Self { shared })
    }

    /// Mutable view of the guarded state.
    ///
    /// # Safety
    ///
    /// The embedded lock must be held by the caller.
    #[allow(clippy::mut_from_ref)]
    unsafe fn state(&self) -> &mut FifoState {
        unsafe { &mut *self.shared.state.get() }
    }

    /// Mutable view of the ring storage.
    ///
    /// # Safety
    ///
    /// The embedded lock must be held by the caller.
    #[allow(clippy::mut_from_ref)]
    unsafe fn buf(&self) -> &mut [u64; CAP] {
        unsafe { &mut *self.shared.buf.get() }
    }

    /// Enqueue `word`, blocking (without spinning) while the queue is full.
    pub fn enqueue(&self, word: u64) -> Result<(), FifoError> {
        self.shared.lock.acquire();
        if let Err(e) = self.wait_while(|state| state.count as usize >= CAP) {
            self.shared.lock.release();
            return Err(e);
        }

        // SAFETY: lock held.
        let state = unsafe { self.state() };
        let buf = unsafe { self.buf() };
        buf[state.tail as usize] = word;
        state.tail = (state.tail + 1) % CAP as u32;
        state.count += 1;

        self.notify_all(state);
        self.shared.lock.release();
        Ok(())
    }

    /// Dequeue the next word, blocking (without spinning) while the queue is
    /// empty.
    pub fn dequeue(&self) -> Result<u64, FifoError> {
        self.shared.lock.acquire();
        if let Err(e) = self.wait_while(|state| state.count == 0) {
            self.shared.lock.release();
            return Err(e);
        }

        // SAFETY: lock held.
        let state = unsafe { self.state() };
        let buf = unsafe { self.buf() };
        let word = buf[state.head as usize];
        state.head = (state.head + 1) % CAP as u32;
        state.count -= 1;

        self.notify_all(state);
        self.shared.lock.release();
        Ok(word)
    }

    /// Enqueue without blocking; fails with [`QueueFull`] at capacity.
    pub fn try_enqueue(&self, word: u64) -> Result<(), QueueFull> {
        self.shared.lock.acquire();
        // SAFETY: lock held.
        let state = unsafe { self.state() };
        if state.count as usize >= CAP {
            self.shared.lock.release();
            return Err(QueueFull);
        }
        let buf = unsafe { self.buf() };
        buf[state.tail as usize] = word;
        state.tail = (state.tail + 1) % CAP as u32;
        state.count += 1;
        self.notify_all(state);
        self.shared.lock.release();
        Ok(())
    }

    /// Dequeue without blocking; `None` while the queue is empty.
    pub fn try_dequeue(&self) -> Option<u64> {
        self.shared.lock.acquire();
        // SAFETY: lock held.
        let state = unsafe { self.state() };
        if state.count == 0 {
            self.shared.lock.release();
            return None;
        }
        let buf = unsafe { self.buf() };
        let word = buf[state.head as usize];
        state.head = (state.head + 1) % CAP as u32;
        state.count -= 1;
        self.notify_all(state);
        self.shared.lock.release();
        Some(word)
    }

    /// Ring capacity in data words.
    #[inline]
    pub fn capacity(&self) -> usize {
        CAP
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.shared.lock.acquire();
        // SAFETY: lock held.
        let count = unsafe { self.state() }.count;
        self.shared.lock.release();
        count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == CAP
    }

    /// Snapshot of cursors, occupancy, and wait-list depth.
    pub fn status(&self) -> FifoStatus {
        self.shared.lock.acquire();
        // SAFETY: lock held.
        let state = unsafe { self.state() };
        let status = FifoStatus {
            head: state.head,
            tail: state.tail,
            len: state.count,
            capacity: CAP as u32,
            waiters: state.waiters,
        };
        self.shared.lock.release();
        status
    }

    /// Block until `condition` stops holding. Called with the lock held;
    /// returns with the lock held.
    ///
    /// While the condition holds, the caller masks the wake signal, registers
    /// its pid, drops the lock, and suspends with the saved mask restored
    /// atomically. The mask must be blocked before the lock is released:
    /// a wake sent in the unlock-to-suspend window then stays pending and is
    /// delivered the moment `sigsuspend` opens the mask, instead of being
    /// lost. Wakes are broadcast, so a stale wake just re-enters the loop.
    fn wait_while(&self, condition: impl Fn(&FifoState) -> bool) -> Result<(), FifoError> {
        // Fast path: no signal bookkeeping when the condition is already clear.
        // SAFETY: lock held.
        if !condition(unsafe { self.state() }) {
            return Ok(());
        }

        signal::ensure_wake_handler().map_err(FifoError::Signal)?;
        let blocked = BlockedWake::block().map_err(FifoError::Signal)?;
        let me = signal::pid();
        loop {
            // SAFETY: lock held at the top of every iteration.
            let state = unsafe { self.state() };
            if !condition(state) {
                // Dropping `blocked` restores the saved mask; a wake still
                // pending from a past round runs the empty handler and is
                // absorbed.
                return Ok(());
            }
            if state.waiters as usize >= MAX_WAITERS {
                return Err(FifoError::WaitListFull { limit: MAX_WAITERS });
            }
            state.waitlist[state.waiters as usize] = me;
            state.waiters += 1;
            tracing::trace!(pid = me, waiters = state.waiters, "parking on wake signal");

            self.shared.lock.release();
            blocked.suspend();
            self.shared.lock.acquire();
        }
    }

    /// Wake every registered waiter and clear the wait-list. Lock must be
    /// held.
    ///
    /// Every completed operation broadcasts: not-full and not-empty waiters
    /// share the single list, and each woken participant re-checks its own
    /// condition.
    fn notify_all(&self, state: &mut FifoState) {
        for entry in &mut state.waitlist[..state.waiters as usize] {
            signal::wake(*entry);
            *entry = 0;
        }
        state.waiters = 0;
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status snapshot of a queue record.
#[derive(Debug, Clone, Copy)]
pub struct FifoStatus {
    /// Next slot to read.
    pub head: u32,
    /// Next slot to write.
    pub tail: u32,
    /// Items currently stored.
    pub len: u32,
    /// Ring capacity.
    pub capacity: u32,
    /// Participants currently registered as blocked.
    pub waiters: u32,
}

impl std::fmt::Display for FifoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "head={} tail={} len={}/{} waiters={}",
            self.head, self.tail, self.len, self.capacity, self.waiters
        )
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors from record initialization and attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Region cannot hold one queue record.
    RegionTooSmall { required: usize, found: usize },
    /// No initialized record present (operation before `init`).
    InvalidMagic,
    /// `init` called on a record that already carries the magic.
    AlreadyInitialized,
    /// Record was initialized by an incompatible layout version.
    IncompatibleVersion { expected: u32, found: u32 },
    /// Record configuration disagrees with this instantiation.
    ConfigMismatch(&'static str),
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegionTooSmall { required, found } => {
                write!(f, "region too small: need {} bytes, got {}", required, found)
            }
            Self::InvalidMagic => write!(f, "no initialized queue record in region"),
            Self::AlreadyInitialized => write!(f, "queue record already initialized"),
            Self::IncompatibleVersion { expected, found } => {
                write!(
                    f,
                    "incompatible layout version: expected {}.{}, found {}.{}",
                    expected >> 16,
                    expected & 0xFFFF,
                    found >> 16,
                    found & 0xFFFF
                )
            }
            Self::ConfigMismatch(msg) => write!(f, "config mismatch: {}", msg),
        }
    }
}

impl std::error::Error for LayoutError {}

/// Errors surfaced by queue operations.
#[derive(Debug)]
pub enum FifoError {
    /// The fixed maximum of simultaneously blocked participants was reached.
    WaitListFull { limit: usize },
    /// Signal-mask or handler installation failed.
    Signal(io::Error),
}

impl std::fmt::Display for FifoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WaitListFull { limit } => {
                write!(f, "wait-list full: {} participants already blocked", limit)
            }
            Self::Signal(e) => write!(f, "signal setup failed: {}", e),
        }
    }
}

impl std::error::Error for FifoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Signal(e) => Some(e),
            _ => None,
        }
    }
}

/// The queue was at capacity; returned by [`Fifo::try_enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

impl std::fmt::Display for QueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue is full")
    }
}

impl std::error::Error for QueueFull {}
