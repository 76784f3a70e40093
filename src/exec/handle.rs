use derive_more::Display;

use super::ExecutorId;
use crate::ir::{NodeId, TensorId};

/// A node surfaced by a [`GraphExecutor`](super::GraphExecutor).
///
/// Only the executor that issued the handle accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[display("node {id} of {owner}")]
pub struct NodeHandle {
    pub(crate) id: NodeId,
    pub(crate) owner: ExecutorId,
}

impl NodeHandle {
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn owner(&self) -> ExecutorId {
        self.owner
    }
}

/// A tensor surfaced by a [`GraphExecutor`](super::GraphExecutor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("tensor {id} of {owner}")]
pub struct TensorHandle {
    pub(crate) id: TensorId,
    pub(crate) owner: ExecutorId,
}

impl TensorHandle {
    #[inline]
    pub fn id(&self) -> TensorId {
        self.id
    }

    #[inline]
    pub fn owner(&self) -> ExecutorId {
        self.owner
    }
}

/// The holder of an attribute.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Graph,
    Node(&'a NodeHandle),
    Tensor(&'a TensorHandle),
}

impl<'a> From<&'a NodeHandle> for Entity<'a> {
    fn from(value: &'a NodeHandle) -> Self {
        Self::Node(value)
    }
}

impl<'a> From<&'a TensorHandle> for Entity<'a> {
    fn from(value: &'a TensorHandle) -> Self {
        Self::Tensor(value)
    }
}
