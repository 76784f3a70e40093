use std::sync::Arc;

use derive_more::{Display, From, Into};

use super::{attr::AttrStore, op::OpDef, tensor::TensorId};
use crate::error::{Error, Result};

/// Maximum number of input or output ports on one node.
pub const MAX_PORTS: usize = 64;

/// Index of a node inside its [`Graph`](super::graph::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
pub struct NodeId(pub(crate) usize);

/// One input or output slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{node}:{index}")]
pub struct Port {
    pub node: NodeId,
    pub index: usize,
}

/// An operator instance.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    op: Arc<OpDef>,
    inputs: Vec<Option<TensorId>>,
    outputs: Vec<Option<TensorId>>,
    pub attrs: AttrStore,
}

impl Node {
    pub fn new(name: impl Into<String>, op: Arc<OpDef>) -> Self {
        let inputs = vec![None; op.inputs()];
        let outputs = vec![None; op.outputs()];
        Self {
            name: name.into(),
            op,
            inputs,
            outputs,
            attrs: Default::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn op(&self) -> &OpDef {
        &self.op
    }

    /// Number of input ports, connected or not. At least what the operator requires.
    #[inline]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    #[inline]
    pub fn input(&self, index: usize) -> Option<TensorId> {
        self.inputs.get(index).copied().flatten()
    }

    #[inline]
    pub fn output(&self, index: usize) -> Option<TensorId> {
        self.outputs.get(index).copied().flatten()
    }

    pub fn inputs(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.inputs.iter().flatten().copied()
    }

    pub fn outputs(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.outputs.iter().flatten().copied()
    }

    /// Connects `tensor` to an input slot, returning the tensor it replaces.
    pub(crate) fn set_input(&mut self, index: usize, tensor: TensorId) -> Result<Option<TensorId>> {
        set_slot(&mut self.inputs, "input ports", index, tensor)
    }

    /// Connects `tensor` to an output slot, returning the tensor it replaces.
    pub(crate) fn set_output(&mut self, index: usize, tensor: TensorId) -> Result<Option<TensorId>> {
        set_slot(&mut self.outputs, "output ports", index, tensor)
    }

    pub(crate) fn remap(&mut self, f: impl Fn(TensorId) -> TensorId) {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .flatten()
            .for_each(|id| *id = f(*id));
    }
}

fn set_slot(
    slots: &mut Vec<Option<TensorId>>,
    what: &'static str,
    index: usize,
    tensor: TensorId,
) -> Result<Option<TensorId>> {
    if index >= MAX_PORTS {
        return Err(Error::Index {
            what,
            index,
            len: MAX_PORTS,
        });
    }
    if slots.len() <= index {
        slots.resize(index + 1, None);
    }
    Ok(slots[index].replace(tensor))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{MAX_PORTS, Node};
    use crate::{
        error::ErrorKind,
        ir::{op::OpDef, tensor::TensorId},
    };

    #[test]
    fn test_ports() {
        let op = Arc::new(OpDef::new("Eltwise", 2, 1));
        let mut node = Node::new("add", op);
        assert_eq!(node.input_count(), 2);
        assert_eq!(node.output_count(), 1);

        assert_eq!(node.set_input(1, TensorId(7)).unwrap(), None);
        assert_eq!(node.input(0), None);
        assert_eq!(node.input(1), Some(TensorId(7)));

        assert_eq!(node.set_input(1, TensorId(8)).unwrap(), Some(TensorId(7)));
        assert_eq!(node.inputs().collect::<Vec<_>>(), vec![TensorId(8)]);
        assert_eq!(node.output(0), None);

        node.set_input(3, TensorId(9)).unwrap();
        assert_eq!(node.input_count(), 4);
    }

    #[test]
    fn test_port_bound() {
        let mut node = Node::new("relu", Arc::new(OpDef::new("ReLU", 1, 1)));
        let err = node.set_input(usize::MAX, TensorId(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = node.set_output(MAX_PORTS, TensorId(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(node.input_count(), 1);
        assert_eq!(node.output_count(), 1);
        node.set_output(MAX_PORTS - 1, TensorId(0)).unwrap();
    }
}
