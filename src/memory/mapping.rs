//! Scoped mappings of a shared segment.

use crate::error::{Error, Result};
use rustix::fd::BorrowedFd;
use rustix::mm::{MapFlags, ProtFlags};
use std::ptr::NonNull;
use tracing::{debug, warn};

/// A `MAP_SHARED` view of a whole segment, unmapped on drop.
///
/// The mapping is independent of the fd it was created from: closing the
/// fd does not invalidate it. Sender and receiver each hold their own
/// mapping of the same physical pages.
pub struct SegmentMapping {
    ptr: NonNull<u8>,
    len: usize,
    writable: bool,
}

impl SegmentMapping {
    pub(crate) fn new(fd: BorrowedFd<'_>, len: usize, writable: bool) -> Result<Self> {
        if len == 0 {
            return Err(Error::Mapping("cannot map an empty segment".into()));
        }

        let prot = if writable {
            ProtFlags::READ | ProtFlags::WRITE
        } else {
            ProtFlags::READ
        };

        // SAFETY: we request a fresh mapping (null hint) of a memfd we hold
        // a valid fd for; the kernel validates `len` against the object.
        let ptr = unsafe {
            rustix::mm::mmap(std::ptr::null_mut(), len, prot, MapFlags::SHARED, fd, 0)
                .map_err(|e| Error::Mapping(format!("mmap of {len} bytes failed: {e}")))?
        };

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::Mapping("mmap returned null".into()))?;

        debug!(len, writable, "mapped segment");
        Ok(Self { ptr, len, writable })
    }

    /// Mapped length in bytes (the segment capacity).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: empty mappings are refused.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the mapping allows writes.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// The mapped bytes.
    ///
    /// Only one side writes, and only before the handle is handed off, so
    /// readers observe a quiescent region.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live mapping owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The mapped bytes, writable. `None` for a read-only mapping.
    #[inline]
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.writable {
            return None;
        }
        // SAFETY: the mapping is writable and `&mut self` guarantees no
        // other slice of it exists in this process.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }
}

impl Drop for SegmentMapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and are unmapped once.
        if let Err(e) = unsafe { rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len) } {
            warn!(len = self.len, error = %e, "munmap failed");
        }
    }
}

impl std::fmt::Debug for SegmentMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentMapping")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("writable", &self.writable)
            .finish()
    }
}

// SAFETY: the mapping is plain memory; access is governed by &/&mut.
unsafe impl Send for SegmentMapping {}
unsafe impl Sync for SegmentMapping {}
