use derive_more::{Display, From, Into};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{
    attr::AttrStore,
    mem::TensorMem,
    node::Port,
    num::{DataType, Scalar},
    shape::{DataLayout, Shape},
};
use crate::error::{Error, Result};

/// Index of a tensor inside its [`Graph`](super::graph::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
pub struct TensorId(pub(crate) usize);

/// Role of a tensor in the computation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TensorKind {
    /// Weights and other constants.
    #[default]
    Const,
    /// Intermediate activations.
    Var,
    /// Data supplied from or returned to the caller.
    Input,
}

#[derive(Debug, Clone)]
pub struct Tensor {
    name: String,
    r#type: DataType,
    kind: TensorKind,
    shape: Shape,
    mem: Option<TensorMem>,
    producer: Option<Port>,
    consumers: Vec<Port>,
    pub attrs: AttrStore,
}

impl Tensor {
    pub fn new(name: impl Into<String>, r#type: DataType, layout: DataLayout) -> Self {
        Self {
            name: name.into(),
            r#type,
            kind: Default::default(),
            shape: Shape::empty(layout),
            mem: None,
            producer: None,
            consumers: vec![],
            attrs: Default::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.r#type
    }

    #[inline]
    pub fn set_data_type(&mut self, r#type: DataType) {
        self.r#type = r#type;
    }

    #[inline]
    pub fn kind(&self) -> TensorKind {
        self.kind
    }

    #[inline]
    pub fn set_kind(&mut self, kind: TensorKind) {
        self.kind = kind;
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Replaces the dims of the shape. Any attached buffer is left untouched.
    pub fn reshape(&mut self, dims: impl Into<Vec<usize>>) -> Result<()> {
        self.shape.set_dims(dims)
    }

    #[inline]
    pub fn set_layout(&mut self, layout: DataLayout) {
        self.shape.set_layout(layout);
    }

    /// Byte size derived from the current shape and data type.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.shape.len() * self.r#type.size()
    }

    #[inline]
    pub fn mem(&self) -> Option<&TensorMem> {
        self.mem.as_ref()
    }

    /// Attaches memory, returning what was attached before.
    #[inline]
    pub fn attach(&mut self, mem: TensorMem) -> Option<TensorMem> {
        self.mem.replace(mem)
    }

    #[inline]
    pub fn detach(&mut self) -> Option<TensorMem> {
        self.mem.take()
    }

    /// Allocates an owned buffer of [`buffer_size`](Self::buffer_size) if none is attached.
    /// Returns `true` if something was allocated.
    pub fn reserve(&mut self) -> bool {
        match (&self.mem, self.buffer_size()) {
            (None, size) if size > 0 => {
                self.mem = Some(TensorMem::alloc(size));
                true
            }
            _ => false,
        }
    }

    /// Copies the tensor contents into `dst`, which must hold at least
    /// [`buffer_size`](Self::buffer_size) bytes. Returns the number of bytes copied.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let size = self.buffer_size();
        if dst.len() < size {
            return Err(Error::BufferTooSmall {
                required: size,
                available: dst.len(),
            });
        }
        let mem = self
            .mem
            .as_ref()
            .ok_or_else(|| Error::NoBuffer(self.name.clone()))?;
        mem.read(&mut dst[..size])?;
        Ok(size)
    }

    /// Copies `src` into the tensor. The first write allocates an owned buffer if none is
    /// attached. Fails without writing if `src` exceeds the tensor's byte size.
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        let size = self.buffer_size();
        if src.len() > size {
            return Err(Error::BufferTooSmall {
                required: src.len(),
                available: size,
            });
        }
        let mem = self.mem.get_or_insert_with(|| TensorMem::alloc(size));
        mem.write(src)
    }

    /// Reads the contents as elements of `T`, which must match the data type.
    pub fn read_as<T: Scalar>(&self) -> Result<Vec<T>> {
        self.check_type::<T>()?;
        let mut bytes = vec![0u8; self.buffer_size()];
        self.read(&mut bytes)?;
        Ok(bytemuck::allocation::pod_collect_to_vec(&bytes))
    }

    /// Writes elements of `T`, which must match the data type.
    pub fn write_as<T: Scalar>(&mut self, data: &[T]) -> Result<()> {
        self.check_type::<T>()?;
        self.write(bytemuck::cast_slice(data))
    }

    fn check_type<T: Scalar>(&self) -> Result<()> {
        match self.r#type == T::DATA_TYPE {
            true => Ok(()),
            false => Err(Error::Type(T::DATA_TYPE, self.r#type)),
        }
    }

    #[inline]
    pub fn producer(&self) -> Option<Port> {
        self.producer
    }

    #[inline]
    pub fn consumers(&self) -> &[Port] {
        &self.consumers
    }

    pub(crate) fn set_producer(&mut self, port: Option<Port>) -> Option<Port> {
        std::mem::replace(&mut self.producer, port)
    }

    pub(crate) fn add_consumer(&mut self, port: Port) {
        self.consumers.push(port);
    }

    pub(crate) fn remove_consumer(&mut self, port: Port) {
        if let Some(index) = self.consumers.iter().position(|&x| x == port) {
            self.consumers.swap_remove(index);
        }
    }

    pub(crate) fn remap(&mut self, f: impl Fn(Port) -> Port) {
        self.producer = self.producer.map(&f);
        self.consumers.iter_mut().for_each(|port| *port = f(*port));
    }
}
