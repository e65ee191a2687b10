//! Columnar frames written directly into a shared segment.
//!
//! # Layout
//!
//! ```text
//! offset 0
//! ┌──────────────┬─────────────────┬─────┬─────────────────┬─────────┬──────────────┐
//! │ schema msg   │ record batch 0  │ ... │ record batch n  │   EOS   │  zero fill   │
//! └──────────────┴─────────────────┴─────┴─────────────────┴─────────┴──────────────┘
//! ◀──────────────────────── frame_len ───────────────────────────────▶
//! ◀──────────────────────────────── segment capacity ───────────────────────────────▶
//! ```
//!
//! Each message is `0xFFFFFFFF`, a little-endian metadata length, a
//! flatbuffer header that declares the body length, then the body. The
//! end-of-stream marker is a message with metadata length 0.

mod column;
pub mod reader;
mod schema;
mod writer;

pub use column::{ColumnAccumulator, ColumnArray, ColumnBatch, PopulationStrategy};
pub use reader::{DecodedFrame, FrameExtent, frame_extent, read_frame};
pub use schema::{FieldSpec, FixedWidthType, FrameSchema, PrimitiveType};
pub use writer::FrameWriter;
