use bytemuck::Pod;
use derive_more::Display;
use half::f16;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a tensor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataType {
    #[default]
    #[display("fp32")]
    F32,
    #[display("fp16")]
    F16,
    #[display("int8")]
    I8,
    #[display("uint8")]
    U8,
    #[display("int32")]
    I32,
    #[display("int16")]
    I16,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::F32,
        DataType::F16,
        DataType::I8,
        DataType::U8,
        DataType::I32,
        DataType::I16,
    ];

    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 => 2,
            DataType::I8 => 1,
            DataType::U8 => 1,
            DataType::I32 => 4,
            DataType::I16 => 2,
        }
    }
}

impl TryFrom<i32> for DataType {
    type Error = Error;

    /// Converts the numeric code used by serialized models.
    fn try_from(value: i32) -> Result<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or_else(|| Error::Model(format!("unknown data type code {value}")))
    }
}

impl From<DataType> for i32 {
    fn from(value: DataType) -> Self {
        value as i32
    }
}

pub trait Scalar: Sized + Pod + Send + Sync {
    const DATA_TYPE: DataType;
}

impl Scalar for f32 {
    const DATA_TYPE: DataType = DataType::F32;
}

impl Scalar for f16 {
    const DATA_TYPE: DataType = DataType::F16;
}

impl Scalar for i8 {
    const DATA_TYPE: DataType = DataType::I8;
}

impl Scalar for u8 {
    const DATA_TYPE: DataType = DataType::U8;
}

impl Scalar for i32 {
    const DATA_TYPE: DataType = DataType::I32;
}

impl Scalar for i16 {
    const DATA_TYPE: DataType = DataType::I16;
}
