//! # arrow-memfd
//!
//! Zero-copy handoff of Arrow record batches between processes on one
//! Linux host.
//!
//! The sender writes an Arrow IPC stream straight into an anonymous memfd
//! segment, seals it, and passes only the file descriptor to the receiver
//! over a Unix socket with `SCM_RIGHTS`. The receiver maps the same pages
//! and decodes the frame in place.
//!
//! ## Features
//!
//! - **memfd segments**: fixed size, sealable, no filesystem path
//! - **Two population strategies**: accumulate-then-copy or direct
//!   construction from typed buffers, producing identical frames
//! - **Fail-closed framing**: the frame is measured before it is written
//! - **One-shot handoff**: an explicit state machine with optional timeout
//!   and cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use arrow_memfd::prelude::*;
//! use arrow::datatypes::Int32Type;
//!
//! // Sender
//! let schema = FrameSchema::new(vec![FieldSpec::new("rand", PrimitiveType::Int32)])?;
//! let column = ColumnArray::build::<Int32Type>(PopulationStrategy::DirectConstruct, values, None)?;
//! let report = Sender::new(HandoffConfig::default())?.send(&schema, &[ColumnBatch::new(vec![column])])?;
//!
//! // Receiver
//! let frame = Receiver::connect("/tmp/memfd_socket")?.receive()?.read_frame()?;
//! println!("{} rows", frame.row_count());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod frame;
pub mod handoff;
pub mod memory;
pub mod sender;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::HandoffConfig;
    pub use crate::error::{Error, Result, SerializationError};
    pub use crate::frame::{
        ColumnAccumulator, ColumnArray, ColumnBatch, DecodedFrame, FieldSpec, FrameSchema,
        FrameWriter, PopulationStrategy, PrimitiveType,
    };
    pub use crate::handoff::{CancelToken, HandoffChannel, ReceivedSegment, Receiver};
    pub use crate::memory::{SegmentAllocator, SharedSegment, TypedBuffer};
    pub use crate::sender::{SendReport, Sender};
}

pub use config::HandoffConfig;
pub use error::{Error, Result, SerializationError};
pub use sender::{SendReport, Sender};
