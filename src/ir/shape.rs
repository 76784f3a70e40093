use derive_more::Display;
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of dims a shape may carry.
pub const MAX_DIMS: usize = 8;

/// Maximum number of elements a shape may hold, so that the byte size of any data type fits.
pub const MAX_ELEMENTS: usize = isize::MAX as usize / 8;

/// Memory order of 4-d activations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataLayout {
    /// Batch, channel, height, width (row-major channel-first).
    #[default]
    #[display("nchw")]
    Nchw,
    /// Batch, height, width, channel (channel-last).
    #[display("nhwc")]
    Nhwc,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[display("[{}]:{layout}", dims.iter().format(", "))]
pub struct Shape {
    dims: Vec<usize>,
    layout: DataLayout,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>, layout: DataLayout) -> Result<Self> {
        let dims = dims.into();
        if dims.len() > MAX_DIMS {
            return Err(Error::Rank(dims.len()));
        }
        let len = dims.iter().try_fold(1usize, |len, &dim| len.checked_mul(dim));
        if len.is_none_or(|len| len > MAX_ELEMENTS) {
            return Err(Error::Shape(dims));
        }
        Ok(Self { dims, layout })
    }

    /// A shape without dims.
    #[inline]
    pub fn empty(layout: DataLayout) -> Self {
        let dims = vec![];
        Self { dims, layout }
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    #[inline]
    pub fn set_layout(&mut self, layout: DataLayout) {
        self.layout = layout;
    }

    /// Replaces the dims, keeping the layout.
    pub fn set_dims(&mut self, dims: impl Into<Vec<usize>>) -> Result<()> {
        *self = Self::new(dims, self.layout)?;
        Ok(())
    }

    /// Number of elements. A shape without dims holds nothing.
    #[inline]
    pub fn len(&self) -> usize {
        match self.dims.is_empty() {
            true => 0,
            false => self.dims.iter().product(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
