//! Frame schemas: ordered fixed-width fields.

use crate::error::{Result, SerializationError};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Field, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type,
    Int64Type, Schema, SchemaRef, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Fixed-width column types a frame can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Unsigned 64-bit integer.
    UInt64,
    /// IEEE 754 single precision.
    Float32,
    /// IEEE 754 double precision.
    Float64,
}

impl PrimitiveType {
    /// Every supported type.
    pub const ALL: [PrimitiveType; 10] = [
        PrimitiveType::Int8,
        PrimitiveType::Int16,
        PrimitiveType::Int32,
        PrimitiveType::Int64,
        PrimitiveType::UInt8,
        PrimitiveType::UInt16,
        PrimitiveType::UInt32,
        PrimitiveType::UInt64,
        PrimitiveType::Float32,
        PrimitiveType::Float64,
    ];

    /// The Arrow data type used on the wire.
    pub fn data_type(self) -> DataType {
        match self {
            PrimitiveType::Int8 => DataType::Int8,
            PrimitiveType::Int16 => DataType::Int16,
            PrimitiveType::Int32 => DataType::Int32,
            PrimitiveType::Int64 => DataType::Int64,
            PrimitiveType::UInt8 => DataType::UInt8,
            PrimitiveType::UInt16 => DataType::UInt16,
            PrimitiveType::UInt32 => DataType::UInt32,
            PrimitiveType::UInt64 => DataType::UInt64,
            PrimitiveType::Float32 => DataType::Float32,
            PrimitiveType::Float64 => DataType::Float64,
        }
    }

    /// Inverse of [`data_type`](Self::data_type). `None` for anything
    /// variable-width or nested.
    pub fn from_data_type(data_type: &DataType) -> Option<Self> {
        Some(match data_type {
            DataType::Int8 => PrimitiveType::Int8,
            DataType::Int16 => PrimitiveType::Int16,
            DataType::Int32 => PrimitiveType::Int32,
            DataType::Int64 => PrimitiveType::Int64,
            DataType::UInt8 => PrimitiveType::UInt8,
            DataType::UInt16 => PrimitiveType::UInt16,
            DataType::UInt32 => PrimitiveType::UInt32,
            DataType::UInt64 => PrimitiveType::UInt64,
            DataType::Float32 => PrimitiveType::Float32,
            DataType::Float64 => PrimitiveType::Float64,
            _ => return None,
        })
    }

    /// Bytes per value.
    pub fn byte_width(self) -> usize {
        match self {
            PrimitiveType::Int8 | PrimitiveType::UInt8 => 1,
            PrimitiveType::Int16 | PrimitiveType::UInt16 => 2,
            PrimitiveType::Int32 | PrimitiveType::UInt32 | PrimitiveType::Float32 => 4,
            PrimitiveType::Int64 | PrimitiveType::UInt64 | PrimitiveType::Float64 => 8,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.data_type(), f)
    }
}

/// An Arrow primitive type that frames can carry.
pub trait FixedWidthType: ArrowPrimitiveType {
    /// The matching frame column type.
    const PRIMITIVE: PrimitiveType;
}

macro_rules! fixed_width {
    ($($arrow:ty => $variant:ident),* $(,)?) => {
        $(
            impl FixedWidthType for $arrow {
                const PRIMITIVE: PrimitiveType = PrimitiveType::$variant;
            }
        )*
    };
}

fixed_width! {
    Int8Type => Int8,
    Int16Type => Int16,
    Int32Type => Int32,
    Int64Type => Int64,
    UInt8Type => UInt8,
    UInt16Type => UInt16,
    UInt32Type => UInt32,
    UInt64Type => UInt64,
    Float32Type => Float32,
    Float64Type => Float64,
}

/// One named, typed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Column name.
    pub name: String,
    /// Value type.
    pub ty: PrimitiveType,
    /// Whether the column may carry a null bitmap.
    pub nullable: bool,
}

impl FieldSpec {
    /// A non-nullable field.
    pub fn new(name: impl Into<String>, ty: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
        }
    }

    /// A field whose columns may contain nulls.
    pub fn nullable(name: impl Into<String>, ty: PrimitiveType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, ty)
        }
    }
}

/// Ordered field list shared by every batch of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSchema {
    fields: Vec<FieldSpec>,
}

impl FrameSchema {
    /// Build a schema. Fields keep the given order.
    ///
    /// # Errors
    ///
    /// [`SerializationError::SchemaMismatch`] for an empty field list or a
    /// repeated field name.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self> {
        if fields.is_empty() {
            return Err(SerializationError::SchemaMismatch("schema has no fields".into()).into());
        }
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SerializationError::SchemaMismatch(format!(
                    "duplicate field name {:?}",
                    field.name
                ))
                .into());
            }
        }
        Ok(Self { fields })
    }

    /// The fields, in order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false: schemas have at least one field.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a field by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Arrow schema written as the frame's first message.
    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .fields
            .iter()
            .map(|f| Field::new(&f.name, f.ty.data_type(), f.nullable))
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// Recover a frame schema from a decoded Arrow schema.
    pub fn from_arrow(schema: &Schema) -> Result<Self> {
        let fields = schema
            .fields()
            .iter()
            .map(|field| {
                let ty = PrimitiveType::from_data_type(field.data_type()).ok_or_else(|| {
                    SerializationError::SchemaMismatch(format!(
                        "field {:?} has unsupported type {}",
                        field.name(),
                        field.data_type()
                    ))
                })?;
                Ok(FieldSpec {
                    name: field.name().clone(),
                    ty,
                    nullable: field.is_nullable(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(fields)
    }
}
