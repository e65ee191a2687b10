//! Typed column arrays and the two ways of populating them.
//!
//! - **Accumulate-then-copy**: [`ColumnAccumulator`] appends one value at a
//!   time into a growable builder and finishes into an immutable array. The
//!   value bytes are copied once into the builder and once into the segment.
//! - **Direct-construct**: [`ColumnArray::direct`] wraps a [`TypedBuffer`]
//!   that already holds the values. The only copy of the value bytes is the
//!   one the frame writer makes from that buffer into the segment.
//!
//! Either way the resulting [`ColumnArray`] serializes to the same bytes.

use super::schema::{FieldSpec, FixedWidthType, FrameSchema, PrimitiveType};
use crate::error::{Error, Result, SerializationError};
use crate::memory::TypedBuffer;
use arrow::array::{Array, ArrayBuilder, ArrayRef, PrimitiveArray, PrimitiveBuilder};
use arrow::buffer::{Buffer, NullBuffer};
use std::sync::Arc;

/// How a column's values get into an Arrow array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PopulationStrategy {
    /// Append into a builder, then copy the finished array into the segment.
    #[default]
    AccumulateThenCopy,
    /// Wrap an existing contiguous buffer in place.
    DirectConstruct,
}

impl std::str::FromStr for PopulationStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accumulate" | "accumulate-then-copy" => Ok(PopulationStrategy::AccumulateThenCopy),
            "direct" | "direct-construct" => Ok(PopulationStrategy::DirectConstruct),
            other => Err(SerializationError::UnknownStrategy(other.to_string()).into()),
        }
    }
}

/// A finished column: an Arrow array tagged with its frame type.
#[derive(Debug, Clone)]
pub struct ColumnArray {
    ty: PrimitiveType,
    array: ArrayRef,
}

impl ColumnArray {
    /// Wrap an existing Arrow array. Fails for non-fixed-width arrays.
    pub fn from_arrow(array: ArrayRef) -> Result<Self> {
        let ty = PrimitiveType::from_data_type(array.data_type()).ok_or_else(|| {
            SerializationError::SchemaMismatch(format!(
                "unsupported column type {}",
                array.data_type()
            ))
        })?;
        Ok(Self { ty, array })
    }

    /// Direct-construct: adopt `values` as the array's value buffer.
    ///
    /// `validity[i] == false` marks row `i` null. An all-valid vector is
    /// treated as absent so no bitmap is written.
    pub fn direct<T: FixedWidthType>(
        values: TypedBuffer<T::Native>,
        validity: Option<Vec<bool>>,
    ) -> Result<Self> {
        let nulls = match validity {
            Some(bits) => {
                check_validity_len(values.len(), bits.len())?;
                let nulls = NullBuffer::from(bits);
                (nulls.null_count() > 0).then_some(nulls)
            }
            None => None,
        };
        let array = PrimitiveArray::<T>::try_new(values.into_scalar_buffer(), nulls)?;
        Ok(Self {
            ty: T::PRIMITIVE,
            array: Arc::new(array),
        })
    }

    /// Build a column from owned values with the chosen strategy.
    pub fn build<T: FixedWidthType>(
        strategy: PopulationStrategy,
        values: Vec<T::Native>,
        validity: Option<Vec<bool>>,
    ) -> Result<Self> {
        match strategy {
            PopulationStrategy::AccumulateThenCopy => {
                let mut acc = ColumnAccumulator::<T>::with_capacity(values.len());
                match validity {
                    Some(bits) => {
                        check_validity_len(values.len(), bits.len())?;
                        for (value, valid) in values.into_iter().zip(bits) {
                            acc.append_with_validity(value, valid);
                        }
                    }
                    None => {
                        for value in values {
                            acc.append(value);
                        }
                    }
                }
                Ok(acc.finish())
            }
            PopulationStrategy::DirectConstruct => {
                Self::direct::<T>(TypedBuffer::from_vec(values), validity)
            }
        }
    }

    /// Frame type of the values.
    #[inline]
    pub fn primitive_type(&self) -> PrimitiveType {
        self.ty
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.array.len()
    }

    /// True for a zero-row column.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// Number of null rows.
    #[inline]
    pub fn null_count(&self) -> usize {
        self.array.null_count()
    }

    /// The underlying Arrow array.
    #[inline]
    pub fn array(&self) -> &ArrayRef {
        &self.array
    }

    /// The validity bitmap, if any, and the value bytes of this column.
    ///
    /// Both share memory with the array; nothing is copied.
    pub(crate) fn buffers(&self) -> Result<(Option<&NullBuffer>, Buffer)> {
        let data = self.array.to_data();
        let width = self.ty.byte_width();
        let values = data
            .buffers()
            .first()
            .map(|b| b.slice_with_length(data.offset() * width, data.len() * width))
            .ok_or_else(|| {
                SerializationError::InvalidFrame(format!("{} column has no value buffer", self.ty))
            })?;
        Ok((self.array.nulls(), values))
    }

    /// Downcast to the concrete primitive array.
    pub fn as_primitive<T: FixedWidthType>(&self) -> Option<&PrimitiveArray<T>> {
        self.array.as_any().downcast_ref::<PrimitiveArray<T>>()
    }
}

fn check_validity_len(values: usize, validity: usize) -> Result<()> {
    if values != validity {
        return Err(SerializationError::LengthMismatch {
            what: "validity bitmap".into(),
            expected: values,
            actual: validity,
        }
        .into());
    }
    Ok(())
}

/// Growable builder for the accumulate-then-copy strategy.
#[derive(Debug)]
pub struct ColumnAccumulator<T: FixedWidthType> {
    builder: PrimitiveBuilder<T>,
}

impl<T: FixedWidthType> Default for ColumnAccumulator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FixedWidthType> ColumnAccumulator<T> {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self {
            builder: PrimitiveBuilder::new(),
        }
    }

    /// Empty accumulator with room for `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            builder: PrimitiveBuilder::with_capacity(capacity),
        }
    }

    /// Append a valid value.
    #[inline]
    pub fn append(&mut self, value: T::Native) {
        self.builder.append_value(value);
    }

    /// Append a null row (value bytes are zero).
    #[inline]
    pub fn append_null(&mut self) {
        self.builder.append_null();
    }

    /// Append a value or a null.
    #[inline]
    pub fn append_option(&mut self, value: Option<T::Native>) {
        self.builder.append_option(value);
    }

    /// Append `value` and mark it valid or null, keeping the value bytes
    /// even for a null row.
    #[inline]
    pub fn append_with_validity(&mut self, value: T::Native, valid: bool) {
        self.builder
            .append_values(std::slice::from_ref(&value), std::slice::from_ref(&valid));
    }

    /// Rows appended so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.builder.len()
    }

    /// True if nothing was appended.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }

    /// Freeze into an immutable column.
    pub fn finish(mut self) -> ColumnArray {
        ColumnArray {
            ty: T::PRIMITIVE,
            array: Arc::new(self.builder.finish()),
        }
    }
}

impl<T: FixedWidthType> Extend<T::Native> for ColumnAccumulator<T> {
    fn extend<I: IntoIterator<Item = T::Native>>(&mut self, iter: I) {
        for value in iter {
            self.append(value);
        }
    }
}

/// Same-length columns forming one record batch.
#[derive(Debug, Clone)]
pub struct ColumnBatch {
    columns: Vec<ColumnArray>,
}

impl ColumnBatch {
    /// Group columns into a batch. Checked against a schema on write.
    pub fn new(columns: Vec<ColumnArray>) -> Self {
        Self { columns }
    }

    /// The columns, in schema order.
    pub fn columns(&self) -> &[ColumnArray] {
        &self.columns
    }

    /// Row count (that of the first column).
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, ColumnArray::len)
    }

    /// Check the batch against `schema` and return its row count.
    pub fn validate(&self, schema: &FrameSchema) -> Result<usize> {
        if self.columns.len() != schema.len() {
            return Err(SerializationError::SchemaMismatch(format!(
                "batch has {} columns but schema has {} fields",
                self.columns.len(),
                schema.len()
            ))
            .into());
        }

        let rows = self.num_rows();
        for (column, field) in self.columns.iter().zip(schema.fields()) {
            check_column(column, field, rows)?;
        }
        Ok(rows)
    }
}

fn check_column(column: &ColumnArray, field: &FieldSpec, rows: usize) -> Result<()> {
    if column.ty != field.ty {
        return Err(SerializationError::SchemaMismatch(format!(
            "field {:?} is {} but column is {}",
            field.name, field.ty, column.ty
        ))
        .into());
    }
    if !field.nullable && column.null_count() > 0 {
        return Err(SerializationError::SchemaMismatch(format!(
            "field {:?} is not nullable but column has {} nulls",
            field.name,
            column.null_count()
        ))
        .into());
    }
    if column.len() != rows {
        return Err(SerializationError::LengthMismatch {
            what: format!("rows in column {:?}", field.name),
            expected: rows,
            actual: column.len(),
        }
        .into());
    }
    Ok(())
}
