//! Shared memory segments.
//!
//! # Architecture
//!
//! - [`SegmentAllocator`]: creates fixed-size memfd segments
//! - [`SharedSegment`]: owns the memfd; duplicable, sealable, sendable
//! - [`SegmentMapping`]: RAII `mmap` of a segment, unmapped on drop
//! - [`TypedBuffer`]: length/alignment-checked value buffer for the
//!   direct-construct path
//!
//! # Example
//!
//! ```rust,ignore
//! use arrow_memfd::memory::SegmentAllocator;
//!
//! let segment = SegmentAllocator::new("arrow_mem").allocate(4096 * 10)?;
//! {
//!     let mut mapping = segment.map_mut()?;
//!     mapping.as_mut_slice().unwrap()[..5].copy_from_slice(b"hello");
//! } // unmapped here
//! segment.seal()?;
//! ```

mod mapping;
mod segment;
mod typed;

pub use mapping::SegmentMapping;
pub use segment::{SegmentAllocator, SharedSegment};
pub use typed::TypedBuffer;
