//! Locating and decoding a frame inside a mapped segment.
//!
//! Segment capacity and frame length are different quantities: the frame
//! occupies a prefix of the segment and the rest is zero fill. The frame
//! end is found by walking the messages' own length prefixes up to the
//! end-of-stream marker, never trusting any length beyond the capacity.

use super::schema::{FixedWidthType, FrameSchema};
use crate::error::{Result, SerializationError};
use arrow::array::{Array, PrimitiveArray};
use arrow::error::ArrowError;
use arrow::ipc::MessageHeader;
use arrow::ipc::reader::StreamReader;
use arrow::record_batch::RecordBatch;
use std::io::Cursor;

/// Marks an encapsulated message (followed by a 4-byte metadata length).
const CONTINUATION_MARKER: u32 = 0xFFFF_FFFF;

/// Where a frame ends and what it contains, found without decoding bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameExtent {
    /// Frame length in bytes, end-of-stream marker included.
    pub len: usize,
    /// Schema and record-batch messages (excluding end-of-stream).
    pub messages: usize,
    /// Record-batch messages.
    pub record_batches: usize,
}

fn invalid(msg: impl Into<String>) -> crate::error::Error {
    SerializationError::InvalidFrame(msg.into()).into()
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let end = offset
        .checked_add(4)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| {
            invalid(format!(
                "frame not terminated within {} bytes (needed prefix at offset {offset})",
                bytes.len()
            ))
        })?;
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..end]);
    Ok(u32::from_le_bytes(word))
}

/// Walk the frame at the start of `bytes` and return its extent.
///
/// Every declared metadata and body length is checked against
/// `bytes.len()` before it is followed.
pub fn frame_extent(bytes: &[u8]) -> Result<FrameExtent> {
    let mut offset = 0usize;
    let mut messages = 0usize;
    let mut record_batches = 0usize;

    loop {
        let mut prefix_len = 4;
        let mut meta_len = read_u32(bytes, offset)?;
        if meta_len == CONTINUATION_MARKER {
            meta_len = read_u32(bytes, offset + 4)?;
            prefix_len = 8;
        }
        if meta_len > i32::MAX as u32 {
            return Err(invalid(format!(
                "negative metadata length at offset {offset}"
            )));
        }

        let meta_start = offset + prefix_len;
        if meta_len == 0 {
            if messages == 0 {
                return Err(invalid("frame has no schema message"));
            }
            if record_batches == 0 {
                return Err(invalid("frame has no record batch"));
            }
            return Ok(FrameExtent {
                len: meta_start,
                messages,
                record_batches,
            });
        }

        let meta_end = meta_start
            .checked_add(meta_len as usize)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                invalid(format!(
                    "message {messages} metadata ({meta_len} bytes at offset {meta_start}) exceeds capacity {}",
                    bytes.len()
                ))
            })?;

        let message = arrow::ipc::root_as_message(&bytes[meta_start..meta_end])
            .map_err(|e| invalid(format!("message {messages} metadata: {e}")))?;
        let body_len = usize::try_from(message.bodyLength())
            .map_err(|_| invalid(format!("message {messages} has negative body length")))?;

        match message.header_type() {
            MessageHeader::Schema if messages == 0 => {}
            MessageHeader::RecordBatch if messages > 0 => record_batches += 1,
            other => {
                return Err(invalid(format!(
                    "unexpected {other:?} message at position {messages}"
                )));
            }
        }

        offset = meta_end
            .checked_add(body_len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                invalid(format!(
                    "message {messages} body ({body_len} bytes at offset {meta_end}) exceeds capacity {}",
                    bytes.len()
                ))
            })?;
        messages += 1;
    }
}

/// A frame decoded from a segment.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    schema: FrameSchema,
    batches: Vec<RecordBatch>,
    len: usize,
}

impl DecodedFrame {
    /// The frame's schema.
    pub fn schema(&self) -> &FrameSchema {
        &self.schema
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize {
        self.schema.len()
    }

    /// Total rows across all batches.
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// The decoded record batches.
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: a decoded frame has at least a schema message.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All values of `field` across batches, `None` for null rows.
    pub fn values<T: FixedWidthType>(&self, field: &str) -> Result<Vec<Option<T::Native>>> {
        let index = self.schema.index_of(field).ok_or_else(|| {
            SerializationError::SchemaMismatch(format!("no field named {field:?}"))
        })?;
        let spec = &self.schema.fields()[index];
        if spec.ty != T::PRIMITIVE {
            return Err(SerializationError::SchemaMismatch(format!(
                "field {field:?} is {} not {}",
                spec.ty,
                T::PRIMITIVE
            ))
            .into());
        }

        let mut out = Vec::with_capacity(self.row_count());
        for batch in &self.batches {
            let array = batch
                .column(index)
                .as_any()
                .downcast_ref::<PrimitiveArray<T>>()
                .ok_or_else(|| {
                    SerializationError::SchemaMismatch(format!(
                        "column {field:?} does not decode as {}",
                        T::PRIMITIVE
                    ))
                })?;
            out.extend(array.iter());
        }
        Ok(out)
    }
}

/// Validate and decode the frame at the start of `bytes`.
///
/// Only `bytes[..frame_extent(bytes)?.len]` is handed to the decoder.
pub fn read_frame(bytes: &[u8]) -> Result<DecodedFrame> {
    let extent = frame_extent(bytes)?;
    let reader = StreamReader::try_new(Cursor::new(&bytes[..extent.len]), None)?;
    let schema = FrameSchema::from_arrow(&reader.schema())?;
    let batches = reader.collect::<std::result::Result<Vec<_>, ArrowError>>()?;

    if batches.len() != extent.record_batches {
        return Err(invalid(format!(
            "decoded {} batches but frame declares {}",
            batches.len(),
            extent.record_batches
        )));
    }

    Ok(DecodedFrame {
        schema,
        batches,
        len: extent.len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::frame::{
        ColumnArray, ColumnBatch, FieldSpec, FrameWriter, PopulationStrategy, PrimitiveType,
    };
    use arrow::datatypes::{Float32Type, Int32Type, UInt16Type};
    use arrow::ipc::writer::StreamWriter;

    fn write(schema: &FrameSchema, batches: &[ColumnBatch], capacity: usize) -> (Vec<u8>, usize) {
        let mut dst = vec![0u8; capacity];
        let len = FrameWriter::new().write_frame(&mut dst, schema, batches).unwrap();
        (dst, len)
    }

    fn int32_schema() -> FrameSchema {
        FrameSchema::new(vec![FieldSpec::new("rand", PrimitiveType::Int32)]).unwrap()
    }

    fn int32_batch(values: Vec<i32>) -> ColumnBatch {
        ColumnBatch::new(vec![
            ColumnArray::build::<Int32Type>(PopulationStrategy::DirectConstruct, values, None)
                .unwrap(),
        ])
    }

    #[test]
    fn test_extent_matches_written_length() {
        let (bytes, len) = write(&int32_schema(), &[int32_batch(vec![1, 2, 3])], 4096);
        let extent = frame_extent(&bytes).unwrap();
        assert_eq!(extent.len, len);
        assert_eq!(extent.messages, 2);
        assert_eq!(extent.record_batches, 1);
    }

    #[test]
    fn test_extent_counts_batches() {
        let batches = [int32_batch(vec![1]), int32_batch(vec![2]), int32_batch(vec![])];
        let (bytes, _) = write(&int32_schema(), &batches, 4096);
        assert_eq!(frame_extent(&bytes).unwrap().record_batches, 3);
    }

    #[test]
    fn test_truncated_capacity_rejected() {
        let (bytes, len) = write(&int32_schema(), &[int32_batch((0..100).collect())], 4096);
        for cut in [0, 3, 8, len / 2, len - 1] {
            let err = frame_extent(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, Error::Serialization(SerializationError::InvalidFrame(_))),
                "cut at {cut}: {err}"
            );
        }
        assert!(read_frame(&bytes[..len - 1]).is_err());
    }

    #[test]
    fn test_inflated_body_length_rejected() {
        let (bytes, len) = write(&int32_schema(), &[int32_batch(vec![1, 2, 3])], 4096);
        // Capacity equal to the frame: any overrun in a declared length is caught.
        assert!(frame_extent(&bytes[..len]).is_ok());
        let mut corrupt = bytes[..len].to_vec();
        corrupt[4..8].copy_from_slice(&(len as u32 * 2).to_le_bytes());
        assert!(frame_extent(&corrupt).is_err());
    }

    #[test]
    fn test_zeroed_segment_has_no_frame() {
        let zeros = vec![0u8; 1024];
        assert!(matches!(
            frame_extent(&zeros),
            Err(Error::Serialization(SerializationError::InvalidFrame(_)))
        ));
    }

    #[test]
    fn test_schema_only_stream_rejected() {
        let arrow_schema = int32_schema().to_arrow();
        let mut writer = StreamWriter::try_new(Vec::new(), &arrow_schema).unwrap();
        writer.finish().unwrap();
        let stream = writer.into_inner().unwrap();

        let mut bytes = vec![0u8; 4096];
        bytes[..stream.len()].copy_from_slice(&stream);
        for result in [frame_extent(&bytes).map(|_| ()), read_frame(&bytes).map(|_| ())] {
            assert!(matches!(
                result,
                Err(Error::Serialization(SerializationError::InvalidFrame(_)))
            ));
        }
    }

    #[test]
    fn test_read_rand_scenario() {
        let values: Vec<i32> = (0..100).map(|i| (i * 37) % 100).collect();
        let (bytes, len) = write(&int32_schema(), &[int32_batch(values.clone())], 40960);

        let frame = read_frame(&bytes).unwrap();
        assert_eq!(frame.len(), len);
        assert_eq!(frame.field_count(), 1);
        assert_eq!(frame.row_count(), 100);
        let decoded: Vec<i32> = frame
            .values::<Int32Type>("rand")
            .unwrap()
            .into_iter()
            .map(Option::unwrap)
            .collect();
        assert_eq!(decoded, values);
        assert!(decoded.iter().all(|v| (0..100).contains(v)));
    }

    #[test]
    fn test_read_nullable_multi_column() {
        let schema = FrameSchema::new(vec![
            FieldSpec::nullable("x", PrimitiveType::Float32),
            FieldSpec::new("y", PrimitiveType::UInt16),
        ])
        .unwrap();
        let batch = ColumnBatch::new(vec![
            ColumnArray::build::<Float32Type>(
                PopulationStrategy::AccumulateThenCopy,
                vec![1.5, 2.5, 3.5],
                Some(vec![true, false, true]),
            )
            .unwrap(),
            ColumnArray::build::<UInt16Type>(
                PopulationStrategy::DirectConstruct,
                vec![7, 8, 9],
                None,
            )
            .unwrap(),
        ]);
        let (bytes, _) = write(&schema, &[batch], 4096);

        let frame = read_frame(&bytes).unwrap();
        assert_eq!(frame.schema(), &schema);
        assert_eq!(
            frame.values::<Float32Type>("x").unwrap(),
            vec![Some(1.5), None, Some(3.5)]
        );
        assert_eq!(
            frame.values::<UInt16Type>("y").unwrap(),
            vec![Some(7), Some(8), Some(9)]
        );
        assert!(frame.values::<Int32Type>("y").is_err());
        assert!(frame.values::<UInt16Type>("missing").is_err());
    }
}
