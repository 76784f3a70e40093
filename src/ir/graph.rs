//! The graph arena: nodes and tensors addressed by index, plus name indices and the
//! sequential execution order.

use std::{cmp::Reverse, collections::BinaryHeap, fmt::Write, sync::Arc};

use itertools::Itertools;
use rustc_hash::FxHashMap as HashMap;

use super::{
    attr::AttrStore,
    node::{Node, NodeId, Port},
    num::DataType,
    op::OpDef,
    shape::DataLayout,
    tensor::{Tensor, TensorId, TensorKind},
};
use crate::error::{Error, Result};

#[derive(Debug, Default, Clone)]
pub struct Graph {
    name: String,
    layout: DataLayout,
    nodes: Vec<Node>,
    tensors: Vec<Tensor>,
    node_names: HashMap<String, NodeId>,
    tensor_names: HashMap<String, TensorId>,
    /// Execution order.
    seq: Vec<NodeId>,
    inputs: Vec<NodeId>,
    outputs: Vec<NodeId>,
    pub attrs: AttrStore,
}

fn check_name(name: &str) -> Result<()> {
    match name.is_empty() {
        true => Err(Error::Name(name.to_owned())),
        false => Ok(()),
    }
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    /// Sets the default layout for tensors created afterwards.
    #[inline]
    pub fn set_layout(&mut self, layout: DataLayout) {
        self.layout = layout;
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    pub fn add_node(&mut self, name: &str, op: Arc<OpDef>) -> Result<NodeId> {
        check_name(name)?;
        if self.node_names.contains_key(name) {
            return Err(Error::NodeExists(name.to_owned()));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name, op));
        self.node_names.insert(name.to_owned(), id);
        self.seq.push(id);
        Ok(id)
    }

    pub fn add_tensor(&mut self, name: &str, r#type: DataType) -> Result<TensorId> {
        check_name(name)?;
        if self.tensor_names.contains_key(name) {
            return Err(Error::TensorExists(name.to_owned()));
        }
        let id = TensorId(self.tensors.len());
        self.tensors.push(Tensor::new(name, r#type, self.layout));
        self.tensor_names.insert(name.to_owned(), id);
        Ok(id)
    }

    #[inline]
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.node_names.get(name).copied()
    }

    #[inline]
    pub fn find_tensor(&self, name: &str) -> Option<TensorId> {
        self.tensor_names.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        let len = self.nodes.len();
        self.nodes.get(id.0).ok_or(Error::Index {
            what: "nodes",
            index: id.0,
            len,
        })
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        let len = self.nodes.len();
        self.nodes.get_mut(id.0).ok_or(Error::Index {
            what: "nodes",
            index: id.0,
            len,
        })
    }

    pub fn tensor(&self, id: TensorId) -> Result<&Tensor> {
        let len = self.tensors.len();
        self.tensors.get(id.0).ok_or(Error::Index {
            what: "tensors",
            index: id.0,
            len,
        })
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> Result<&mut Tensor> {
        let len = self.tensors.len();
        self.tensors.get_mut(id.0).ok_or(Error::Index {
            what: "tensors",
            index: id.0,
            len,
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, x)| (NodeId(i), x))
    }

    pub fn tensors(&self) -> impl Iterator<Item = (TensorId, &Tensor)> {
        self.tensors.iter().enumerate().map(|(i, x)| (TensorId(i), x))
    }

    pub fn tensors_mut(&mut self) -> impl Iterator<Item = (TensorId, &mut Tensor)> {
        self.tensors
            .iter_mut()
            .enumerate()
            .map(|(i, x)| (TensorId(i), x))
    }

    /// Nodes in execution order.
    #[inline]
    pub fn seq(&self) -> &[NodeId] {
        &self.seq
    }

    /// Replaces the execution order. `seq` must be a permutation of all nodes.
    pub(crate) fn set_seq(&mut self, seq: Vec<NodeId>) {
        debug_assert_eq!(seq.len(), self.nodes.len());
        self.seq = seq;
    }

    #[inline]
    pub fn input_nodes(&self) -> &[NodeId] {
        &self.inputs
    }

    #[inline]
    pub fn output_nodes(&self) -> &[NodeId] {
        &self.outputs
    }

    fn resolve_nodes(&self, names: &[&str]) -> Result<Vec<NodeId>> {
        if names.is_empty() {
            return Err(Error::EmptyNodeList);
        }
        names
            .iter()
            .map(|&name| {
                self.find_node(name)
                    .ok_or_else(|| Error::NodeNotFound(name.to_owned()))
            })
            .collect()
    }

    /// Replaces the input node list. Nothing changes if any name is unknown.
    pub fn set_input_nodes(&mut self, names: &[&str]) -> Result<()> {
        self.inputs = self.resolve_nodes(names)?;
        Ok(())
    }

    /// Replaces the output node list. Nothing changes if any name is unknown.
    pub fn set_output_nodes(&mut self, names: &[&str]) -> Result<()> {
        self.outputs = self.resolve_nodes(names)?;
        Ok(())
    }

    /// Connects `tensor` to input `index` of `node`, registering the port as a consumer.
    pub fn connect_input(&mut self, node: NodeId, index: usize, tensor: TensorId) -> Result<()> {
        self.tensor(tensor)?;
        let port = Port { node, index };
        let old = self.node_mut(node)?.set_input(index, tensor)?;
        if let Some(old) = old {
            self.tensors[old.0].remove_consumer(port);
        }
        self.tensors[tensor.0].add_consumer(port);
        Ok(())
    }

    /// Connects `tensor` to output `index` of `node`, making the port its sole producer.
    pub fn connect_output(
        &mut self,
        node: NodeId,
        index: usize,
        tensor: TensorId,
        kind: TensorKind,
    ) -> Result<()> {
        self.tensor(tensor)?;
        let port = Port { node, index };
        let old = self.node_mut(node)?.set_output(index, tensor)?;
        if let Some(old) = old.filter(|&old| old != tensor) {
            let old = &mut self.tensors[old.0];
            if old.producer() == Some(port) {
                old.set_producer(None);
            }
        }

        let tensor = &mut self.tensors[tensor.0];
        tensor.set_kind(kind);
        if let Some(prev) = tensor.set_producer(Some(port)).filter(|&prev| prev != port) {
            log::warn!("tensor {} producer {prev} replaced by {port}", tensor.name());
        }
        Ok(())
    }

    /// Checks that every required input port of every node is connected.
    pub fn validate(&self) -> Result<()> {
        for &id in self.inputs.iter().chain(self.outputs.iter()) {
            self.node(id)?;
        }
        for node in &self.nodes {
            if let Some(port) = (0..node.op().inputs()).find(|&i| node.input(i).is_none()) {
                return Err(Error::Unconnected {
                    node: node.name().to_owned(),
                    port,
                });
            }
        }
        Ok(())
    }

    /// Orders nodes so that every producer runs before its consumers.
    /// Independent nodes keep their relative position in the current order.
    pub fn topo_order(&self) -> Result<Vec<NodeId>> {
        let position: HashMap<NodeId, usize> =
            self.seq.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut degree = vec![0usize; self.nodes.len()];
        let mut successors = vec![vec![]; self.nodes.len()];
        for (id, node) in self.nodes() {
            for tensor in node.inputs() {
                let Some(port) = self.tensors[tensor.0].producer() else {
                    continue;
                };
                if port.node != id {
                    degree[id.0] += 1;
                    successors[port.node.0].push(id);
                }
            }
        }

        let mut ready: BinaryHeap<_> = self
            .seq
            .iter()
            .filter(|id| degree[id.0] == 0)
            .map(|id| Reverse((position[id], *id)))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for &next in &successors[id.0] {
                degree[next.0] -= 1;
                if degree[next.0] == 0 {
                    ready.push(Reverse((position[&next], next)));
                }
            }
        }

        match order.len() == self.nodes.len() {
            true => Ok(order),
            false => Err(Error::Cycle(self.name.clone())),
        }
    }

    /// Builds a new graph holding the union of `graphs`. Names must not clash across them.
    pub fn merge(name: impl Into<String>, graphs: &[&Graph]) -> Result<Graph> {
        let mut merged = Graph::new(name);
        if let Some(first) = graphs.first() {
            merged.layout = first.layout;
        }

        for graph in graphs {
            let node_offset = merged.nodes.len();
            let tensor_offset = merged.tensors.len();
            let node_id = |id: NodeId| NodeId(id.0 + node_offset);
            let tensor_id = |id: TensorId| TensorId(id.0 + tensor_offset);

            for node in &graph.nodes {
                if merged.node_names.contains_key(node.name()) {
                    return Err(Error::NodeExists(node.name().to_owned()));
                }
                let mut node = node.clone();
                node.remap(tensor_id);
                merged
                    .node_names
                    .insert(node.name().to_owned(), NodeId(merged.nodes.len()));
                merged.nodes.push(node);
            }
            for tensor in &graph.tensors {
                if merged.tensor_names.contains_key(tensor.name()) {
                    return Err(Error::TensorExists(tensor.name().to_owned()));
                }
                let mut tensor = tensor.clone();
                tensor.remap(|port| Port {
                    node: node_id(port.node),
                    index: port.index,
                });
                merged
                    .tensor_names
                    .insert(tensor.name().to_owned(), TensorId(merged.tensors.len()));
                merged.tensors.push(tensor);
            }

            merged.seq.extend(graph.seq.iter().copied().map(node_id));
            merged.inputs.extend(graph.inputs.iter().copied().map(node_id));
            merged
                .outputs
                .extend(graph.outputs.iter().copied().map(node_id));
            for key in graph.attrs.keys() {
                if !merged.attrs.contains(key) {
                    let value = graph.attrs.get(key)?.clone();
                    merged.attrs.add(key, value)?;
                }
            }
        }
        Ok(merged)
    }

    /// Human-readable listing of the nodes in execution order.
    pub fn dump(&self) -> String {
        let tensor_name = |id: TensorId| {
            self.tensors
                .get(id.0)
                .map_or("?".to_owned(), |tensor| {
                    format!("{}{}<{}>", tensor.name(), tensor.shape(), tensor.data_type())
                })
        };
        let node_names = |ids: &[NodeId]| {
            ids.iter()
                .filter_map(|id| self.nodes.get(id.0))
                .map(Node::name)
                .join(", ")
        };

        let mut s = String::new();
        _ = writeln!(
            s,
            "graph {} ({} nodes, {} tensors, {})",
            self.name,
            self.nodes.len(),
            self.tensors.len(),
            self.layout
        );
        _ = writeln!(s, "  inputs: [{}]", node_names(&self.inputs));
        _ = writeln!(s, "  outputs: [{}]", node_names(&self.outputs));
        for &id in &self.seq {
            let node = &self.nodes[id.0];
            _ = writeln!(
                s,
                "  {}: {} ({}) -> ({})",
                node.name(),
                node.op(),
                node.inputs().map(tensor_name).join(", "),
                node.outputs().map(tensor_name).join(", "),
            );
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Graph;
    use crate::{
        error::ErrorKind,
        ir::{
            node::{NodeId, Port},
            num::DataType,
            op::OpDef,
            tensor::TensorKind,
        },
    };

    fn op(name: &str, inputs: usize) -> Arc<OpDef> {
        Arc::new(OpDef::new(name, inputs, 1))
    }

    /// `x -> relu -> y -> softmax -> z`, declared consumer-first.
    fn chain() -> Graph {
        let mut graph = Graph::new("chain");
        let softmax = graph.add_node("softmax", op("Softmax", 1)).unwrap();
        let relu = graph.add_node("relu", op("ReLU", 1)).unwrap();
        let input = graph.add_node("input", op("Input", 0)).unwrap();

        let x = graph.add_tensor("x", DataType::F32).unwrap();
        let y = graph.add_tensor("y", DataType::F32).unwrap();
        let z = graph.add_tensor("z", DataType::F32).unwrap();

        graph.connect_output(input, 0, x, TensorKind::Input).unwrap();
        graph.connect_input(relu, 0, x).unwrap();
        graph.connect_output(relu, 0, y, TensorKind::Var).unwrap();
        graph.connect_input(softmax, 0, y).unwrap();
        graph.connect_output(softmax, 0, z, TensorKind::Var).unwrap();

        graph.set_input_nodes(&["input"]).unwrap();
        graph.set_output_nodes(&["softmax"]).unwrap();
        graph
    }

    #[test]
    fn test_duplicate_names() {
        let mut graph = Graph::new("g");
        graph.add_node("n0", op("Const", 0)).unwrap();
        let err = graph.add_node("n0", op("Const", 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(graph.node_count(), 1);

        graph.add_tensor("t0", DataType::F32).unwrap();
        let err = graph.add_tensor("t0", DataType::I8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(graph.tensor_count(), 1);

        assert!(graph.add_node("", op("Const", 0)).is_err());
    }

    #[test]
    fn test_find_is_exact() {
        let graph = chain();
        assert!(graph.find_node("relu").is_some());
        assert!(graph.find_node("ReLU").is_none());
        assert!(graph.find_tensor("x").is_some());
        assert!(graph.find_tensor("X").is_none());
    }

    #[test]
    fn test_producer_consumers() {
        let mut graph = Graph::new("g");
        let source = graph.add_node("source", op("Const", 0)).unwrap();
        let t = graph.add_tensor("t", DataType::F32).unwrap();
        graph.connect_output(source, 0, t, TensorKind::Const).unwrap();

        let mut sinks = vec![];
        for i in 0..3 {
            let sink = graph
                .add_node(&format!("sink{i}"), op("Eltwise", 2))
                .unwrap();
            graph.connect_input(sink, 0, t).unwrap();
            graph.connect_input(sink, 1, t).unwrap();
            sinks.push(sink);
        }

        let tensor = graph.tensor(t).unwrap();
        assert_eq!(tensor.producer(), Some(Port { node: source, index: 0 }));
        assert_eq!(tensor.consumers().len(), 6);
        for sink in sinks {
            for index in 0..2 {
                assert!(tensor.consumers().contains(&Port { node: sink, index }));
            }
        }

        // re-attaching an input port replaces its consumer entry
        let other = graph.add_tensor("other", DataType::F32).unwrap();
        graph.connect_input(NodeId(1), 0, other).unwrap();
        assert_eq!(graph.tensor(t).unwrap().consumers().len(), 5);
        assert_eq!(graph.tensor(other).unwrap().consumers().len(), 1);

        // a second producer overwrites the first
        graph.connect_output(NodeId(1), 0, t, TensorKind::Var).unwrap();
        let tensor = graph.tensor(t).unwrap();
        assert_eq!(tensor.producer(), Some(Port { node: NodeId(1), index: 0 }));
        assert_eq!(tensor.kind(), TensorKind::Var);
    }

    #[test]
    fn test_set_nodes_atomic() {
        let mut graph = chain();
        let err = graph.set_output_nodes(&["relu", "missing"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(graph.output_nodes(), &[graph.find_node("softmax").unwrap()]);

        let err = graph.set_input_nodes(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_validate() {
        let mut graph = chain();
        graph.validate().unwrap();

        graph.add_node("dangling", op("Convolution", 1)).unwrap();
        let err = graph.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_topo_order() {
        let graph = chain();
        let names: Vec<_> = graph
            .topo_order()
            .unwrap()
            .into_iter()
            .map(|id| graph.node(id).unwrap().name().to_owned())
            .collect();
        assert_eq!(names, ["input", "relu", "softmax"]);
    }

    #[test]
    fn test_topo_cycle() {
        let mut graph = Graph::new("loop");
        let a = graph.add_node("a", op("ReLU", 1)).unwrap();
        let b = graph.add_node("b", op("ReLU", 1)).unwrap();
        let x = graph.add_tensor("x", DataType::F32).unwrap();
        let y = graph.add_tensor("y", DataType::F32).unwrap();
        graph.connect_output(a, 0, x, TensorKind::Var).unwrap();
        graph.connect_input(b, 0, x).unwrap();
        graph.connect_output(b, 0, y, TensorKind::Var).unwrap();
        graph.connect_input(a, 0, y).unwrap();
        assert!(graph.topo_order().is_err());
    }

    #[test]
    fn test_merge() {
        let lhs = chain();
        let mut rhs = Graph::new("rhs");
        let c = rhs.add_node("c", op("Const", 0)).unwrap();
        let w = rhs.add_tensor("w", DataType::F16).unwrap();
        rhs.connect_output(c, 0, w, TensorKind::Const).unwrap();
        rhs.set_output_nodes(&["c"]).unwrap();

        let merged = Graph::merge("merged", &[&lhs, &rhs]).unwrap();
        assert_eq!(merged.node_count(), 4);
        assert_eq!(merged.tensor_count(), 4);
        assert_eq!(merged.output_nodes().len(), 2);
        assert_eq!(merged.input_nodes().len(), 1);

        let c = merged.find_node("c").unwrap();
        let w = merged.find_tensor("w").unwrap();
        assert_eq!(merged.node(c).unwrap().output(0), Some(w));
        assert_eq!(
            merged.tensor(w).unwrap().producer(),
            Some(Port { node: c, index: 0 })
        );
        merged.validate().unwrap();

        let err = Graph::merge("clash", &[&lhs, &lhs]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_dump() {
        let dump = chain().dump();
        assert!(dump.contains("graph chain (3 nodes, 3 tensors, nchw)"));
        assert!(dump.contains("relu: ReLU (x[]:nchw<fp32>) -> (y[]:nchw<fp32>)"));
    }
}
