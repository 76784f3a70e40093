//! The graph data model: tensors, nodes, operators, attributes and the graph arena that owns
//! them.
//!
//! Entities are addressed by [`NodeId`] and [`TensorId`], indices into the owning [`Graph`].
//! Producer and consumer links are [`Port`]s, so connectivity never holds references into
//! the arena.

pub mod attr;
pub mod graph;
pub mod mem;
pub mod node;
pub mod num;
pub mod op;
pub mod shape;
pub mod tensor;

pub use attr::{AttrStore, AttrValue, FromAttr};
pub use graph::Graph;
pub use mem::{ExternalBuffer, TensorMem};
pub use node::{MAX_PORTS, Node, NodeId, Port};
pub use num::{DataType, Scalar};
pub use op::{OpDef, OpRegistry};
pub use shape::{DataLayout, MAX_DIMS, MAX_ELEMENTS, Shape};
pub use tensor::{Tensor, TensorId, TensorKind};
