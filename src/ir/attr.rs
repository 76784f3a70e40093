//! Typed key/value metadata attached to graphs, nodes and tensors.
//!
//! Each attribute fixes its kind and byte size when it is added. Later writes must keep both,
//! and typed reads fail on a kind mismatch instead of reinterpreting bytes.

use derive_more::{Display, From};
use rustc_hash::FxHashMap as HashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Display, From)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AttrValue {
    #[display("{_0}")]
    Bool(bool),
    #[display("{_0}")]
    Int(i32),
    #[display("{_0}")]
    Float(f32),
    #[display("{_0:?}")]
    Str(String),
    #[display("{_0:?}")]
    Ints(Vec<i32>),
    #[display("{_0:?}")]
    Floats(Vec<f32>),
    #[display("<{} bytes>", _0.len())]
    Bytes(#[cfg_attr(feature = "serde", serde(with = "serde_bytes"))] Vec<u8>),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl AttrValue {
    /// Name of the payload kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AttrValue::Bool(_) => "bool",
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Str(_) => "string",
            AttrValue::Ints(_) => "ints",
            AttrValue::Floats(_) => "floats",
            AttrValue::Bytes(_) => "bytes",
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        match self {
            AttrValue::Bool(_) => size_of::<bool>(),
            AttrValue::Int(_) => size_of::<i32>(),
            AttrValue::Float(_) => size_of::<f32>(),
            AttrValue::Str(x) => x.len(),
            AttrValue::Ints(x) => size_of_val(x.as_slice()),
            AttrValue::Floats(x) => size_of_val(x.as_slice()),
            AttrValue::Bytes(x) => x.len(),
        }
    }

    /// Raw native-endian bytes of the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            AttrValue::Bool(x) => vec![*x as u8],
            AttrValue::Int(x) => x.to_ne_bytes().to_vec(),
            AttrValue::Float(x) => x.to_ne_bytes().to_vec(),
            AttrValue::Str(x) => x.as_bytes().to_vec(),
            AttrValue::Ints(x) => bytemuck::cast_slice(x).to_vec(),
            AttrValue::Floats(x) => bytemuck::cast_slice(x).to_vec(),
            AttrValue::Bytes(x) => x.clone(),
        }
    }
}

/// Conversion out of an [`AttrValue`] of the matching kind.
pub trait FromAttr: Sized {
    const KIND: &'static str;

    fn from_attr(value: &AttrValue) -> Option<Self>;
}

macro_rules! impl_from_attr {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl FromAttr for $ty {
            const KIND: &'static str = $kind;

            #[inline]
            fn from_attr(value: &AttrValue) -> Option<Self> {
                match value {
                    AttrValue::$variant(x) => Some(x.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_from_attr!(bool, Bool, "bool");
impl_from_attr!(i32, Int, "int");
impl_from_attr!(f32, Float, "float");
impl_from_attr!(String, Str, "string");
impl_from_attr!(Vec<i32>, Ints, "ints");
impl_from_attr!(Vec<f32>, Floats, "floats");
impl_from_attr!(Vec<u8>, Bytes, "bytes");

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AttrStore {
    map: HashMap<String, AttrValue>,
}

impl AttrStore {
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// Adds a new attribute. Fails if `key` is taken.
    pub fn add(&mut self, key: &str, value: impl Into<AttrValue>) -> Result<()> {
        if self.map.contains_key(key) {
            return Err(Error::AttrExists(key.to_owned()));
        }
        self.map.insert(key.to_owned(), value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<&AttrValue> {
        self.map
            .get(key)
            .ok_or_else(|| Error::AttrNotFound(key.to_owned()))
    }

    /// Reads an attribute as `T`. Fails if the stored kind differs.
    pub fn get_as<T: FromAttr>(&self, key: &str) -> Result<T> {
        let value = self.get(key)?;
        T::from_attr(value).ok_or_else(|| Error::AttrType {
            key: key.to_owned(),
            expected: T::KIND,
            found: value.kind(),
        })
    }

    /// Copies the raw payload into `buf` and returns the number of bytes written.
    /// Fails if `buf` is smaller than the stored size.
    pub fn read_into(&self, key: &str, buf: &mut [u8]) -> Result<usize> {
        let bytes = self.get(key)?.to_bytes();
        if buf.len() < bytes.len() {
            return Err(Error::BufferTooSmall {
                required: bytes.len(),
                available: buf.len(),
            });
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Overwrites an existing attribute with a value of the same kind and size.
    pub fn set(&mut self, key: &str, value: impl Into<AttrValue>) -> Result<()> {
        let value = value.into();
        let stored = self
            .map
            .get_mut(key)
            .ok_or_else(|| Error::AttrNotFound(key.to_owned()))?;
        if stored.kind() != value.kind() {
            return Err(Error::AttrType {
                key: key.to_owned(),
                expected: stored.kind(),
                found: value.kind(),
            });
        }
        if stored.size() != value.size() {
            return Err(Error::AttrSize {
                key: key.to_owned(),
                stored: stored.size(),
                given: value.size(),
            });
        }
        *stored = value;
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<AttrValue> {
        self.map
            .remove(key)
            .ok_or_else(|| Error::AttrNotFound(key.to_owned()))
    }
}
