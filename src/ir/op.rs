use std::sync::{Arc, RwLock};

use derive_more::Display;
use rustc_hash::FxHashMap as HashMap;

use crate::error::{Error, Result};

/// Describes an operator kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[display("{name}")]
pub struct OpDef {
    name: String,
    /// Number of input ports that must be connected.
    inputs: usize,
    /// Number of output ports the operator produces.
    outputs: usize,
}

impl OpDef {
    pub fn new(name: impl Into<String>, inputs: usize, outputs: usize) -> Self {
        let name = name.into();
        Self {
            name,
            inputs,
            outputs,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn inputs(&self) -> usize {
        self.inputs
    }

    #[inline]
    pub fn outputs(&self) -> usize {
        self.outputs
    }
}

/// Operators known to the runtime, looked up by exact name.
#[derive(Debug, Default)]
pub struct OpRegistry {
    ops: RwLock<HashMap<String, Arc<OpDef>>>,
}

impl OpRegistry {
    /// Returns a registry pre-populated with the built-in operators.
    pub fn builtin() -> Self {
        let registry = Self::default();
        [
            OpDef::new("Const", 0, 1),
            OpDef::new("Input", 0, 1),
            OpDef::new("Convolution", 1, 1),
            OpDef::new("Pooling", 1, 1),
            OpDef::new("ReLU", 1, 1),
            OpDef::new("Softmax", 1, 1),
            OpDef::new("FullyConnected", 1, 1),
            OpDef::new("Eltwise", 2, 1),
            OpDef::new("Concat", 1, 1),
            OpDef::new("Reshape", 1, 1),
        ]
        .into_iter()
        .for_each(|op| {
            let name = op.name.clone();
            registry
                .ops
                .write()
                .expect("failed to lock")
                .insert(name, Arc::new(op));
        });
        registry
    }

    pub fn register(&self, op: OpDef) -> Result<Arc<OpDef>> {
        let mut ops = self.ops.write().expect("failed to lock");
        if ops.contains_key(op.name()) {
            return Err(Error::OpExists(op.name));
        }
        let op = Arc::new(op);
        ops.insert(op.name.clone(), op.clone());
        Ok(op)
    }

    pub fn get(&self, name: &str) -> Result<Arc<OpDef>> {
        self.ops
            .read()
            .expect("failed to lock")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::OpNotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.read().expect("failed to lock").contains_key(name)
    }
}
