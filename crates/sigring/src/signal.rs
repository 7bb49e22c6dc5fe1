//! Block/wake built from asynchronous process signals.
//!
//! The queue's waiting protocol needs one property the OS only grants through
//! `sigsuspend`: restoring the signal mask and beginning to wait happen as a
//! single indivisible step. A wake delivered after the waiter has released
//! the queue lock but before it suspends is held pending by the blocked mask
//! and delivered the instant `sigsuspend` opens it, instead of being lost.

use std::io;
use std::mem::MaybeUninit;
use std::sync::Once;

use libc::c_int;

/// Signal used to resume a suspended waiter.
pub const WAKE_SIGNAL: c_int = libc::SIGUSR1;

static HANDLER_INSTALL: Once = Once::new();

/// The handler body is empty: delivery alone interrupts `sigsuspend`.
extern "C" fn wake_handler(_signal: c_int) {}

/// Install the wake-signal handler for this process. Idempotent.
pub fn ensure_wake_handler() -> io::Result<()> {
    let mut result = Ok(());
    HANDLER_INSTALL.call_once(|| {
        // SAFETY: a zeroed sigaction plus an explicit handler and empty mask
        // is a valid argument for a standard signal.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = wake_handler as extern "C" fn(c_int) as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = 0;
            if libc::sigaction(WAKE_SIGNAL, &action, std::ptr::null_mut()) != 0 {
                result = Err(io::Error::last_os_error());
            }
        }
    });
    result
}

/// The wake signal blocked for the calling thread, prior mask saved.
///
/// Constructed before a waiter registers itself; the saved mask is what
/// [`suspend`](Self::suspend) atomically restores while waiting. Dropping the
/// guard restores the saved mask.
pub struct BlockedWake {
    saved: libc::sigset_t,
}

impl BlockedWake {
    /// Block [`WAKE_SIGNAL`], saving the prior mask.
    pub fn block() -> io::Result<Self> {
        // SAFETY: sets are initialized through sigemptyset/sigaddset before
        // use, and pthread_sigmask receives valid pointers.
        unsafe {
            let mut block = MaybeUninit::<libc::sigset_t>::uninit();
            libc::sigemptyset(block.as_mut_ptr());
            libc::sigaddset(block.as_mut_ptr(), WAKE_SIGNAL);

            let mut saved = MaybeUninit::<libc::sigset_t>::uninit();
            if libc::pthread_sigmask(libc::SIG_BLOCK, block.as_ptr(), saved.as_mut_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                saved: saved.assume_init(),
            })
        }
    }

    /// Atomically restore the saved mask and wait for a signal.
    ///
    /// Returns once any unblocked signal has been handled; on return the
    /// blocking mask is in force again. Spurious returns are expected and
    /// callers re-evaluate their condition in a loop.
    pub fn suspend(&self) {
        // SAFETY: saved is a mask previously produced by pthread_sigmask.
        // sigsuspend always returns -1 with errno EINTR after handling a
        // signal; that is its success path.
        unsafe {
            libc::sigsuspend(&self.saved);
        }
    }
}

impl Drop for BlockedWake {
    fn drop(&mut self) {
        // SAFETY: restoring a mask previously saved by pthread_sigmask.
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.saved, std::ptr::null_mut());
        }
    }
}

/// Send the wake signal to a registered participant.
///
/// A participant that exited between registering and being woken is gone;
/// `ESRCH` is expected and ignored.
pub fn wake(pid: libc::pid_t) {
    // SAFETY: kill with a valid signal number.
    let rc = unsafe { libc::kill(pid, WAKE_SIGNAL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pid, error = %err, "wake signal delivery failed");
        }
    }
}

/// Calling process id.
#[inline]
pub(crate) fn pid() -> libc::pid_t {
    // SAFETY: getpid cannot fail.
    unsafe { libc::getpid() }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn handler_install_is_idempotent() {
        ensure_wake_handler().unwrap();
        ensure_wake_handler().unwrap();
    }

    #[test]
    fn block_saves_and_restores_mask() {
        // SAFETY: reading the current mask with valid pointers.
        let is_blocked = || unsafe {
            let mut current = MaybeUninit::<libc::sigset_t>::uninit();
            libc::pthread_sigmask(libc::SIG_SETMASK, std::ptr::null(), current.as_mut_ptr());
            libc::sigismember(current.as_ptr(), WAKE_SIGNAL) == 1
        };

        assert!(!is_blocked());
        {
            let _guard = BlockedWake::block().unwrap();
            assert!(is_blocked());
        }
        assert!(!is_blocked());
    }
}
