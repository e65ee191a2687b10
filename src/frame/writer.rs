//! Serializing a frame into a mapped segment.
//!
//! A frame is the Arrow IPC streaming format: one schema message, one or
//! more record-batch messages, then the end-of-stream marker. Each message
//! carries its own length prefix and everything is little-endian.
//!
//! Every message is planned before anything is written: the flatbuffer
//! headers are built, and the body is a list of references to the columns'
//! own buffers. The plan gives the exact frame size, so an oversized frame
//! fails without touching the destination. Writing then copies each value
//! buffer straight into the destination; the value bytes never pass through
//! an intermediate body buffer.

use super::column::{ColumnArray, ColumnBatch};
use super::schema::FrameSchema;
use crate::error::{Result, SerializationError};
use arrow::buffer::Buffer;
use arrow::ipc::writer::{DictionaryTracker, IpcDataGenerator, IpcWriteOptions};
use arrow::ipc::{self, MessageHeader, MetadataVersion};
use flatbuffers::FlatBufferBuilder;
use std::io::{self, Write};
use tracing::{debug, info};

/// Continuation marker opening every encapsulated message.
const CONTINUATION: [u8; 4] = [0xFF; 4];

/// Continuation marker plus the 4-byte metadata length.
const PREFIX_LEN: usize = 8;

/// Continuation marker followed by a zero metadata length.
const END_OF_STREAM: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0];

const DEFAULT_ALIGNMENT: usize = 64;

const ZEROS: [u8; 64] = [0; 64];
const ALL_VALID: [u8; 64] = [0xFF; 64];

/// Encodes schema + batches as an Arrow IPC stream into a byte region.
///
/// # Example
///
/// ```rust,ignore
/// let mut mapping = segment.map_mut()?;
/// let dst = mapping.as_mut_slice().unwrap();
/// let frame_len = FrameWriter::new().write_frame(dst, &schema, &[batch])?;
/// ```
#[derive(Debug, Clone)]
pub struct FrameWriter {
    options: IpcWriteOptions,
    alignment: usize,
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self {
            options: IpcWriteOptions::default(),
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl FrameWriter {
    /// Writer padding every buffer to 64 bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer padding every buffer to `alignment` bytes (8, 16, 32 or 64).
    pub fn with_alignment(alignment: usize) -> Result<Self> {
        let options = IpcWriteOptions::try_new(alignment, false, MetadataVersion::V5)?;
        Ok(Self { options, alignment })
    }

    /// Buffer alignment in bytes.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Exact size in bytes of the frame for `schema` and `batches`.
    pub fn measure(&self, schema: &FrameSchema, batches: &[ColumnBatch]) -> Result<usize> {
        Ok(self.plan(schema, batches)?.len())
    }

    /// Write a complete frame at the start of `dst` and return its length.
    ///
    /// # Errors
    ///
    /// - [`SerializationError::CapacityExceeded`] if the frame is larger
    ///   than `dst`; `dst` is left untouched.
    /// - [`SerializationError::SchemaMismatch`] /
    ///   [`SerializationError::LengthMismatch`] if a batch does not match
    ///   the schema, or if `batches` is empty.
    pub fn write_frame(
        &self,
        dst: &mut [u8],
        schema: &FrameSchema,
        batches: &[ColumnBatch],
    ) -> Result<usize> {
        let plan = self.plan(schema, batches)?;
        let required = plan.len();
        let capacity = dst.len();
        debug!(required, capacity, batches = batches.len(), "measured frame");

        if required > capacity {
            return Err(SerializationError::CapacityExceeded { required, capacity }.into());
        }

        let mut cursor = SliceCursor::new(dst);
        plan.write_to(&mut cursor).map_err(|e| {
            SerializationError::InvalidFrame(format!("writing planned frame failed: {e}"))
        })?;
        let written = cursor.position();
        if written != required {
            return Err(SerializationError::InvalidFrame(format!(
                "wrote {written} bytes after measuring {required}"
            ))
            .into());
        }

        info!(
            frame_len = written,
            capacity,
            fields = schema.len(),
            rows = batches.iter().map(ColumnBatch::num_rows).sum::<usize>(),
            "frame written"
        );
        Ok(written)
    }

    fn plan(&self, schema: &FrameSchema, batches: &[ColumnBatch]) -> Result<FramePlan> {
        if batches.is_empty() {
            return Err(SerializationError::SchemaMismatch(
                "a frame needs at least one record batch".into(),
            )
            .into());
        }

        let mut tracker = DictionaryTracker::new(false);
        let schema_header = IpcDataGenerator::default()
            .schema_to_bytes_with_dictionary_tracker(&schema.to_arrow(), &mut tracker, &self.options)
            .ipc_message;

        let mut messages = Vec::with_capacity(batches.len() + 1);
        messages.push(MessagePlan::new(schema_header, Vec::new(), 0, self.alignment));
        for batch in batches {
            let rows = batch.validate(schema)?;
            messages.push(self.plan_batch(rows, batch.columns())?);
        }
        Ok(FramePlan { messages })
    }

    /// Header and body layout of one record-batch message, laid out the
    /// way Arrow's own stream writer lays it out.
    fn plan_batch(&self, rows: usize, columns: &[ColumnArray]) -> Result<MessagePlan> {
        let mut nodes = Vec::with_capacity(columns.len());
        let mut descriptors = Vec::with_capacity(columns.len() * 2);
        let mut body = Vec::with_capacity(columns.len() * 2);
        let mut offset = 0usize;

        for column in columns {
            nodes.push(ipc::FieldNode::new(column.len() as i64, column.null_count() as i64));

            let (nulls, values) = column.buffers()?;
            let validity = match nulls {
                Some(nulls) => BodySource::Shared(nulls.inner().sliced()),
                None => BodySource::AllValid(column.len().div_ceil(8)),
            };
            for source in [validity, BodySource::Shared(values)] {
                let len = source.len();
                let padding = len.next_multiple_of(self.alignment) - len;
                descriptors.push(ipc::Buffer::new(offset as i64, len as i64));
                offset += len + padding;
                body.push(BodyBuffer { source, padding });
            }
        }

        let mut fbb = FlatBufferBuilder::new();
        let descriptors = fbb.create_vector(&descriptors);
        let nodes = fbb.create_vector(&nodes);
        let header = {
            let mut batch = ipc::RecordBatchBuilder::new(&mut fbb);
            batch.add_length(rows as i64);
            batch.add_nodes(nodes);
            batch.add_buffers(descriptors);
            batch.finish().as_union_value()
        };
        let mut message = ipc::MessageBuilder::new(&mut fbb);
        message.add_version(MetadataVersion::V5);
        message.add_header_type(MessageHeader::RecordBatch);
        message.add_bodyLength(offset as i64);
        message.add_header(header);
        let root = message.finish();
        fbb.finish(root, None);

        Ok(MessagePlan::new(
            fbb.finished_data().to_vec(),
            body,
            offset,
            self.alignment,
        ))
    }
}

/// Every message of a frame, ready to be written.
struct FramePlan {
    messages: Vec<MessagePlan>,
}

impl FramePlan {
    fn len(&self) -> usize {
        self.messages.iter().map(MessagePlan::len).sum::<usize>() + END_OF_STREAM.len()
    }

    fn write_to(&self, out: &mut SliceCursor<'_>) -> io::Result<()> {
        for message in &self.messages {
            message.write_to(out)?;
        }
        out.write_all(&END_OF_STREAM)
    }
}

struct MessagePlan {
    header: Vec<u8>,
    header_padding: usize,
    body: Vec<BodyBuffer>,
    body_len: usize,
}

impl MessagePlan {
    fn new(header: Vec<u8>, body: Vec<BodyBuffer>, body_len: usize, alignment: usize) -> Self {
        let unpadded = PREFIX_LEN + header.len();
        Self {
            header_padding: unpadded.next_multiple_of(alignment) - unpadded,
            header,
            body,
            body_len,
        }
    }

    fn metadata_len(&self) -> usize {
        self.header.len() + self.header_padding
    }

    fn len(&self) -> usize {
        PREFIX_LEN + self.metadata_len() + self.body_len
    }

    fn write_to(&self, out: &mut SliceCursor<'_>) -> io::Result<()> {
        let metadata_len = i32::try_from(self.metadata_len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "message header too large"))?;
        out.write_all(&CONTINUATION)?;
        out.write_all(&metadata_len.to_le_bytes())?;
        out.write_all(&self.header)?;
        out.fill(&ZEROS, self.header_padding)?;
        for buffer in &self.body {
            buffer.write_to(out)?;
        }
        Ok(())
    }
}

/// Where the bytes of one body buffer come from.
enum BodySource {
    /// Memory owned by the column.
    Shared(Buffer),
    /// A validity bitmap of this many bytes with every bit set.
    AllValid(usize),
}

impl BodySource {
    fn len(&self) -> usize {
        match self {
            BodySource::Shared(buffer) => buffer.len(),
            BodySource::AllValid(len) => *len,
        }
    }
}

struct BodyBuffer {
    source: BodySource,
    padding: usize,
}

impl BodyBuffer {
    fn write_to(&self, out: &mut SliceCursor<'_>) -> io::Result<()> {
        match &self.source {
            BodySource::Shared(buffer) => out.write_all(buffer.as_slice())?,
            BodySource::AllValid(len) => out.fill(&ALL_VALID, *len)?,
        }
        out.fill(&ZEROS, self.padding)
    }
}

/// Bounded cursor over the destination region. Refuses any write that
/// would run past the end instead of truncating it.
struct SliceCursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceCursor<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    /// Write `len` bytes taken repeatedly from `pattern`.
    fn fill(&mut self, pattern: &[u8], mut len: usize) -> io::Result<()> {
        while len > 0 {
            let n = len.min(pattern.len());
            self.write_all(&pattern[..n])?;
            len -= n;
        }
        Ok(())
    }
}

impl Write for SliceCursor<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let end = self
            .pos
            .checked_add(data.len())
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::WriteZero, "segment capacity exhausted")
            })?;
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
