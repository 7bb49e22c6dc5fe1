//! Anonymous shared memory regions.
//!
//! A [`SharedRegion`] wraps a `MAP_SHARED | MAP_ANONYMOUS` mapping. Created
//! before `fork`, the same physical pages are addressed by every process
//! forked afterwards, which is the sharing model the queue record relies on.
//! The mapping is released when the handle drops.

use core::mem::{align_of, size_of};
use std::io;
use std::ptr;

/// An anonymous, process-shared memory mapping.
pub struct SharedRegion {
    base: *mut u8,
    len: usize,
}

// SAFETY: the mapping is plain memory; concurrent access is synchronized by
// the primitives placed inside it, not by this handle.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Map `len` bytes of zeroed, anonymous, process-shared memory.
    pub fn anonymous(len: usize) -> io::Result<Self> {
        assert!(len > 0, "region length must be > 0");

        // SAFETY: anonymous mapping; no fd, offset 0.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            base: base as *mut u8,
            len,
        })
    }

    /// Length of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    /// View the start of the region as a `T`.
    ///
    /// # Safety
    ///
    /// The bytes must form a valid `T`, and all concurrent mutation of the
    /// viewed memory must be synchronized (atomics, or a lock placed in the
    /// region).
    pub unsafe fn get<T>(&self) -> &T {
        assert!(size_of::<T>() <= self.len, "region too small for type");
        assert!(
            (self.base as usize).is_multiple_of(align_of::<T>()),
            "region misaligned for type"
        );
        // SAFETY: size and alignment checked above; validity is the caller's.
        unsafe { &*(self.base as *const T) }
    }

    /// View the start of the region as a mutable `T`.
    ///
    /// # Safety
    ///
    /// As [`get`](Self::get), and additionally no other reference into the
    /// region may exist while the returned borrow lives; intended for
    /// one-time initialization before the region is shared.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut<T>(&self) -> &mut T {
        assert!(size_of::<T>() <= self.len, "region too small for type");
        assert!(
            (self.base as usize).is_multiple_of(align_of::<T>()),
            "region misaligned for type"
        );
        // SAFETY: size and alignment checked above; exclusivity is the caller's.
        unsafe { &mut *(self.base as *mut T) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: base and len were returned by mmap.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}
