//! Anonymous shared memory segments backed by Linux memfd.
//!
//! A [`SharedSegment`] owns the memfd. It is not tied to any filesystem
//! path, can be duplicated and can be sent to another process via
//! `SCM_RIGHTS`. The kernel keeps the backing pages alive for as long as
//! any fd or mapping references them.

use super::SegmentMapping;
use crate::error::{Error, Result};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::fs::{MemfdFlags, SealFlags};
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::debug;

/// Seals applied by [`SharedSegment::seal`].
const HANDOFF_SEALS: SealFlags = SealFlags::SHRINK
    .union(SealFlags::GROW)
    .union(SealFlags::WRITE)
    .union(SealFlags::SEAL);

/// Creates fixed-size memfd segments.
///
/// # Example
///
/// ```rust,ignore
/// let allocator = SegmentAllocator::new("arrow_mem");
/// let segment = allocator.allocate(4096 * 10)?;
/// let mut mapping = segment.map_mut()?;
/// ```
#[derive(Debug, Clone)]
pub struct SegmentAllocator {
    name: String,
    sealing: bool,
}

impl SegmentAllocator {
    /// Allocator producing segments with the given debug name.
    ///
    /// Sealing support is enabled by default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sealing: true,
        }
    }

    /// Create segments with or without `MFD_ALLOW_SEALING`.
    pub fn with_sealing(mut self, sealing: bool) -> Self {
        self.sealing = sealing;
        self
    }

    /// Debug name given to each memfd.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Allocate a segment of exactly `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if `size` is 0 or if `memfd_create` or
    /// `ftruncate` fails.
    pub fn allocate(&self, size: usize) -> Result<SharedSegment> {
        if size == 0 {
            return Err(Error::Allocation(
                "size must be greater than 0".into(),
            ));
        }

        let cname =
            CString::new(self.name.as_str()).map_err(|e| Error::Allocation(e.to_string()))?;
        let mut flags = MemfdFlags::CLOEXEC;
        if self.sealing {
            flags |= MemfdFlags::ALLOW_SEALING;
        }
        let fd = rustix::fs::memfd_create(&cname, flags)
            .map_err(|e| Error::Allocation(format!("memfd_create failed: {e}")))?;

        rustix::fs::ftruncate(&fd, size as u64)
            .map_err(|e| Error::Allocation(format!("ftruncate to {size} bytes failed: {e}")))?;

        debug!(name = %self.name, size, fd = fd.as_raw_fd(), "allocated segment");

        Ok(SharedSegment { fd, len: size })
    }
}

/// An anonymous, fixed-size shared memory object.
///
/// Dropping the segment closes this process's fd. Existing mappings and
/// fds held elsewhere (e.g. by a receiver) keep the memory alive.
#[derive(Debug)]
pub struct SharedSegment {
    fd: OwnedFd,
    len: usize,
}

impl SharedSegment {
    /// Adopt a segment handle received from another process.
    ///
    /// The capacity is read from the fd with `fstat`.
    pub fn from_fd(fd: OwnedFd) -> Result<Self> {
        let stat = rustix::fs::fstat(&fd)
            .map_err(|e| Error::Mapping(format!("fstat on received handle failed: {e}")))?;
        let len = usize::try_from(stat.st_size)
            .map_err(|_| Error::Mapping(format!("invalid segment size {}", stat.st_size)))?;

        if len == 0 {
            return Err(Error::Mapping("segment has zero size".into()));
        }

        Ok(Self { fd, len })
    }

    /// Capacity in bytes, fixed at creation.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: segments are never empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the fd, e.g. to send it via `SCM_RIGHTS`.
    #[inline]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Raw fd number (for logging).
    #[inline]
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Give up ownership of the fd.
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }

    /// Duplicate the handle. Both handles refer to the same memory and
    /// are closed independently.
    pub fn try_clone(&self) -> Result<Self> {
        let fd = rustix::io::fcntl_dupfd_cloexec(&self.fd, 0)
            .map_err(|e| Error::Io(e.into()))?;
        Ok(Self { fd, len: self.len })
    }

    /// Map the whole segment read-write.
    pub fn map_mut(&self) -> Result<SegmentMapping> {
        SegmentMapping::new(self.fd.as_fd(), self.len, true)
    }

    /// Map the whole segment read-only.
    pub fn map_read_only(&self) -> Result<SegmentMapping> {
        SegmentMapping::new(self.fd.as_fd(), self.len, false)
    }

    /// Forbid any further resize or write through any handle.
    ///
    /// Must be called after every writable mapping has been dropped; the
    /// kernel refuses `F_SEAL_WRITE` while one exists.
    pub fn seal(&self) -> Result<()> {
        rustix::fs::fcntl_add_seals(&self.fd, HANDOFF_SEALS).map_err(|e| {
            let reason = match e {
                rustix::io::Errno::BUSY => "a writable mapping is still alive",
                rustix::io::Errno::PERM => "segment is already sealed or sealing was not enabled",
                _ => "fcntl(F_ADD_SEALS) failed",
            };
            Error::Allocation(format!("{reason}: {e}"))
        })?;
        debug!(fd = self.fd.as_raw_fd(), "sealed segment");
        Ok(())
    }

    /// Whether the segment can no longer be resized.
    pub fn is_sealed(&self) -> Result<bool> {
        match rustix::fs::fcntl_get_seals(&self.fd) {
            Ok(seals) => Ok(seals.contains(SealFlags::SHRINK | SealFlags::GROW)),
            Err(rustix::io::Errno::INVAL) => Ok(false),
            Err(e) => Err(Error::Io(e.into())),
        }
    }
}

impl AsFd for SharedSegment {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> SegmentAllocator {
        SegmentAllocator::new("test-segment")
    }

    #[test]
    fn test_allocate() {
        let segment = allocator().allocate(4096).unwrap();
        assert_eq!(segment.len(), 4096);
        assert!(!segment.is_empty());
        assert!(segment.raw_fd() >= 0);
    }

    #[test]
    fn test_zero_size_fails() {
        assert!(matches!(allocator().allocate(0), Err(Error::Allocation(_))));
    }

    #[test]
    fn test_name_with_nul_fails() {
        let result = SegmentAllocator::new("bad\0name").allocate(64);
        assert!(matches!(result, Err(Error::Allocation(_))));
    }

    #[test]
    fn test_odd_size() {
        // Sizes need not be page multiples.
        let segment = allocator().allocate(1).unwrap();
        let mut mapping = segment.map_mut().unwrap();
        mapping.as_mut_slice().unwrap()[0] = 7;
        assert_eq!(mapping.as_slice(), &[7]);
    }

    #[test]
    fn test_from_fd_reads_capacity() {
        let segment = allocator().allocate(12345).unwrap();
        let dup = rustix::io::fcntl_dupfd_cloexec(segment.fd(), 0).unwrap();
        let adopted = SharedSegment::from_fd(dup).unwrap();
        assert_eq!(adopted.len(), 12345);
    }

    #[test]
    fn test_clone_shares_memory() {
        let segment = allocator().allocate(4096).unwrap();
        let clone = segment.try_clone().unwrap();
        assert_ne!(segment.raw_fd(), clone.raw_fd());

        segment.map_mut().unwrap().as_mut_slice().unwrap()[100] = 42;
        assert_eq!(clone.map_read_only().unwrap().as_slice()[100], 42);
    }

    #[test]
    fn test_memory_outlives_original_fd() {
        let segment = allocator().allocate(4096).unwrap();
        segment.map_mut().unwrap().as_mut_slice().unwrap()[0] = 9;
        let clone = segment.try_clone().unwrap();
        drop(segment);
        assert_eq!(clone.map_read_only().unwrap().as_slice()[0], 9);
    }

    #[test]
    fn test_seal_blocks_resize() {
        let segment = allocator().allocate(4096).unwrap();
        assert!(!segment.is_sealed().unwrap());
        segment.seal().unwrap();
        assert!(segment.is_sealed().unwrap());

        assert!(rustix::fs::ftruncate(segment.fd(), 8192).is_err());
        assert!(segment.map_mut().is_err());
        assert!(segment.map_read_only().is_ok());
    }

    #[test]
    fn test_seal_with_live_writable_mapping_fails() {
        let segment = allocator().allocate(4096).unwrap();
        let mapping = segment.map_mut().unwrap();
        assert!(matches!(segment.seal(), Err(Error::Allocation(_))));
        drop(mapping);
        segment.seal().unwrap();
    }

    #[test]
    fn test_unsealable_segment() {
        let segment = allocator().with_sealing(false).allocate(4096).unwrap();
        assert!(matches!(segment.seal(), Err(Error::Allocation(_))));
        assert!(!segment.is_sealed().unwrap());
    }
}
