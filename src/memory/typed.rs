//! Typed views over raw value buffers.

use crate::error::{Result, SerializationError};
use arrow::buffer::{Buffer, ScalarBuffer};
use arrow::datatypes::ArrowNativeType;
use std::mem::{align_of, size_of};

/// A contiguous run of fixed-width values, checked for length and
/// alignment when it is built.
///
/// This is the input of the direct-construct strategy. Arrow adopts the
/// buffer as-is, and the frame writer copies it straight into the segment,
/// so that copy is the only one the value bytes ever see.
#[derive(Debug, Clone)]
pub struct TypedBuffer<T: ArrowNativeType> {
    values: ScalarBuffer<T>,
}

impl<T: ArrowNativeType> TypedBuffer<T> {
    /// Take ownership of a vector without copying it.
    pub fn from_vec(values: Vec<T>) -> Self {
        Self {
            values: ScalarBuffer::from(values),
        }
    }

    /// View an untyped byte buffer as values of `T`.
    ///
    /// # Errors
    ///
    /// [`SerializationError::LengthMismatch`] if the byte length is not a
    /// multiple of `size_of::<T>()`, [`SerializationError::Misaligned`] if
    /// the buffer does not start on a `T` boundary.
    pub fn try_from_buffer(buffer: Buffer) -> Result<Self> {
        let width = size_of::<T>();
        let remainder = buffer.len() % width;
        if remainder != 0 {
            return Err(SerializationError::LengthMismatch {
                what: format!("byte length (multiple of {width})"),
                expected: buffer.len() - remainder,
                actual: buffer.len(),
            }
            .into());
        }

        let align = align_of::<T>();
        let address = buffer.as_ptr() as usize;
        if address % align != 0 {
            return Err(SerializationError::Misaligned { address, align }.into());
        }

        let len = buffer.len() / width;
        Ok(Self {
            values: ScalarBuffer::new(buffer, 0, len),
        })
    }

    /// Number of values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if there are no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The values.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// Address of the first value.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.values.as_ptr()
    }

    pub(crate) fn into_scalar_buffer(self) -> ScalarBuffer<T> {
        self.values
    }
}

impl<T: ArrowNativeType> From<Vec<T>> for TypedBuffer<T> {
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_from_vec_is_zero_copy() {
        let values: Vec<i32> = (0..100).collect();
        let ptr = values.as_ptr();
        let buffer = TypedBuffer::from_vec(values);
        assert_eq!(buffer.as_ptr(), ptr);
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.as_slice()[99], 99);
    }

    #[test]
    fn test_from_bytes() {
        let bytes = Buffer::from_slice_ref([1i64, 2, 3]);
        let buffer = TypedBuffer::<i64>::try_from_buffer(bytes).unwrap();
        assert_eq!(buffer.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_ragged_length_rejected() {
        let bytes = Buffer::from_slice_ref([0u8; 10]);
        let err = TypedBuffer::<i32>::try_from_buffer(bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Serialization(SerializationError::LengthMismatch {
                expected: 8,
                actual: 10,
                ..
            })
        ));
    }

    #[test]
    fn test_misaligned_rejected() {
        // Arrow buffers are 64-byte aligned, so offset 1 is never aligned.
        let bytes = Buffer::from_slice_ref([0u8; 9]).slice(1);
        let err = TypedBuffer::<i32>::try_from_buffer(bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Serialization(SerializationError::Misaligned { align: 4, .. })
        ));
    }

    #[test]
    fn test_empty() {
        let buffer = TypedBuffer::<f64>::from_vec(Vec::new());
        assert!(buffer.is_empty());
    }
}
