//! Core types for tensor shapes, values, and metadata.

use crate::{Error, Result};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    #[default]
    F32,
    F16,
    I64,
    I32,
    I8,
    U64,
    U8,
    Bool,
}

impl DataType {
    /// Width of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 => 2,
            DataType::I64 | DataType::U64 => 8,
            DataType::I8 | DataType::U8 | DataType::Bool => 1,
        }
    }

    /// Numeric code written into ext-info shape records.
    pub fn code(self) -> i32 {
        match self {
            DataType::F32 => 0,
            DataType::F16 => 1,
            DataType::I8 => 2,
            DataType::I32 => 3,
            DataType::U8 => 4,
            DataType::I64 => 9,
            DataType::U64 => 10,
            DataType::Bool => 12,
        }
    }
}

/// A single dimension of a partially known shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Known(usize),
    Unknown,
}

/// Sentinel written for an unknown dimension in flat shape encodings.
pub const UNKNOWN_DIM: i64 = -1;

/// Sentinel written (as the only dimension) for an unknown rank.
pub const UNKNOWN_RANK: i64 = -2;

/// Tensor shape with support for static, partially known, unknown-rank and absent shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorShape {
    /// All dimensions are known at compile time.
    Static(Vec<usize>),

    /// Rank is known but some dimensions are only known at run time.
    Dynamic(Vec<Dim>),

    /// Nothing is known about the shape before execution.
    UnknownRank,

    /// Optional input that is absent.
    Absent,
}

impl TensorShape {
    /// Check if the shape is fully static.
    pub fn is_static(&self) -> bool {
        matches!(self, TensorShape::Static(_))
    }

    /// Check if the shape is absent.
    pub fn is_absent(&self) -> bool {
        matches!(self, TensorShape::Absent)
    }

    /// Check if any part of the shape is only known at run time.
    pub fn is_unknown(&self) -> bool {
        matches!(self, TensorShape::Dynamic(_) | TensorShape::UnknownRank)
    }

    /// Get static dimensions if available.
    pub fn as_static(&self) -> Option<&[usize]> {
        match self {
            TensorShape::Static(dims) => Some(dims),
            _ => None,
        }
    }

    /// Number of dimensions, if known.
    pub fn ndim(&self) -> Option<usize> {
        match self {
            TensorShape::Static(dims) => Some(dims.len()),
            TensorShape::Dynamic(dims) => Some(dims.len()),
            TensorShape::UnknownRank | TensorShape::Absent => None,
        }
    }

    /// Number of elements, if every dimension is known.
    pub fn numel(&self) -> Option<usize> {
        self.as_static().map(|dims| dims.iter().product())
    }

    /// Flat `i64` encoding: unknown dims become `-1`, unknown rank becomes `[-2]`.
    pub fn to_dims(&self) -> Vec<i64> {
        match self {
            TensorShape::Static(dims) => dims.iter().map(|&d| d as i64).collect(),
            TensorShape::Dynamic(dims) => dims
                .iter()
                .map(|d| match d {
                    Dim::Known(n) => *n as i64,
                    Dim::Unknown => UNKNOWN_DIM,
                })
                .collect(),
            TensorShape::UnknownRank => vec![UNKNOWN_RANK],
            TensorShape::Absent => Vec::new(),
        }
    }

    /// Inverse of [`TensorShape::to_dims`].
    pub fn from_dims(dims: &[i64]) -> Self {
        if dims == [UNKNOWN_RANK] {
            return TensorShape::UnknownRank;
        }
        if dims.iter().all(|&d| d >= 0) {
            return TensorShape::Static(dims.iter().map(|&d| d as usize).collect());
        }
        TensorShape::Dynamic(
            dims.iter()
                .map(|&d| if d >= 0 { Dim::Known(d as usize) } else { Dim::Unknown })
                .collect(),
        )
    }
}

/// Raw tensor data for constant folding.
///
/// Separated from metadata (shape, dtype) to enable flexible tensor operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    I64(Vec<i64>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    Bool(Vec<bool>),
    U8(Vec<u8>),
}

impl TensorData {
    /// Get the number of elements in this tensor data.
    pub fn len(&self) -> usize {
        match self {
            TensorData::I64(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::Bool(v) => v.len(),
            TensorData::U8(v) => v.len(),
        }
    }

    /// Check if this tensor data is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            TensorData::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            TensorData::I32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            TensorData::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            TensorData::U8(v) => Some(v),
            _ => None,
        }
    }

    /// Get the inferred data type from this tensor data.
    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::I64(_) => DataType::I64,
            TensorData::I32(_) => DataType::I32,
            TensorData::F32(_) => DataType::F32,
            TensorData::Bool(_) => DataType::Bool,
            TensorData::U8(_) => DataType::U8,
        }
    }
}

/// A tensor value known at compile time (for constant folding).
///
/// Only small tensors are stored (shape metadata, indices, folded constants).
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    /// The raw tensor data.
    pub data: TensorData,

    /// The shape of the tensor (dimensions).
    pub shape: Vec<usize>,

    /// The data type of the tensor.
    pub dtype: DataType,
}

impl TensorValue {
    /// Create a new TensorValue, validating element count and dtype.
    pub fn new(data: TensorData, shape: Vec<usize>, dtype: DataType) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(Error::InvalidArgument(format!(
                "Data length {} doesn't match shape {:?} (product = {})",
                data.len(),
                shape,
                expected_len
            )));
        }
        if data.dtype() != dtype {
            return Err(Error::InvalidArgument(format!(
                "Data type {:?} doesn't match declared dtype {:?}",
                data.dtype(),
                dtype
            )));
        }
        Ok(Self { data, shape, dtype })
    }

    /// Create a value whose dtype is taken from the data.
    pub fn from_data(data: TensorData, shape: Vec<usize>) -> Result<Self> {
        let dtype = data.dtype();
        Self::new(data, shape, dtype)
    }

    /// Get the number of elements in this tensor value.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if this tensor value is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        self.data.as_i64()
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        self.data.as_i32()
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        self.data.as_f32()
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        self.data.as_bool()
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        self.data.as_u8()
    }

    /// Create a new TensorValue with a different shape (data unchanged).
    pub fn reshape(&self, new_shape: Vec<usize>) -> Result<Self> {
        Self::new(self.data.clone(), new_shape, self.dtype)
    }
}
