//! Graph executors: the public handle over a graph and its lifecycle.
//!
//! An executor starts out [`Created`](ExecStatus::Created) with a mutable graph. [`prerun`]
//! validates it, binds a device and builds the optimized view that every later run executes.
//! From then on the structure is frozen: node and tensor queries traverse the optimized view,
//! and only data, shapes and attributes may change.
//!
//! [`prerun`]: GraphExecutor::prerun

use std::{
    path::Path,
    sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use derive_more::Display;
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use event::{EventHook, EventInfo, GraphEvent, RunState};
pub use handle::{Entity, NodeHandle, TensorHandle};
pub use pass::{Pass, TopoSort};

use crate::{
    context::Context,
    device::{Completion, DeviceExecutor, Job},
    error::{Error, Record, Result},
    ir::{
        AttrStore, AttrValue, DataLayout, DataType, ExternalBuffer, FromAttr, Graph, Node, NodeId,
        Scalar, Shape, Tensor, TensorId, TensorKind, TensorMem,
    },
    model::{LoadOptions, ModelFormat, ModelSource},
    runtime::{Runtime, runtime},
};

pub mod event;
pub mod handle;
pub mod pass;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub struct ExecutorId(uid::Id<ExecutorId>);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecStatus {
    /// The graph is being built.
    #[default]
    Created,
    /// Prerun is done; the graph may be run.
    Ready,
    Running,
    Done,
    Error,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// Returns once the run is complete.
    #[default]
    Blocking,
    /// Returns once the run is dispatched.
    Async,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitMode {
    /// Blocks until the run is complete.
    #[default]
    Block,
    /// Polls once.
    Try,
}

type Pending = flume::Receiver<Result<()>>;

fn input_of(node: &Node, index: usize) -> Result<TensorId> {
    match node.input(index) {
        Some(id) => Ok(id),
        None if index < node.input_count() => Err(Error::Unconnected {
            node: node.name().to_owned(),
            port: index,
        }),
        None => Err(Error::Index {
            what: "input ports",
            index,
            len: node.input_count(),
        }),
    }
}

fn output_of(node: &Node, index: usize) -> Result<TensorId> {
    match node.output(index) {
        Some(id) => Ok(id),
        None if index < node.output_count() => Err(Error::Unconnected {
            node: node.name().to_owned(),
            port: index,
        }),
        None => Err(Error::Index {
            what: "output ports",
            index,
            len: node.output_count(),
        }),
    }
}

fn nth(ids: &[NodeId], what: &'static str, index: usize) -> Result<NodeId> {
    ids.get(index).copied().ok_or(Error::Index {
        what,
        index,
        len: ids.len(),
    })
}

pub struct GraphExecutor {
    id: ExecutorId,
    context: Context,
    /// Whether the context was created for this executor alone.
    private: bool,
    /// The model loaded on behalf of this executor.
    model: Option<String>,
    graph: RwLock<Graph>,
    /// The optimized view, built at prerun.
    view: Option<Arc<RwLock<Graph>>>,
    /// Device requested by the caller.
    device_name: Option<String>,
    /// Device bound at prerun.
    device: Option<Arc<dyn DeviceExecutor>>,
    state: Arc<RunState>,
    pending: Mutex<Option<Pending>>,
}

impl std::fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("context", &self.context.name())
            .field("device", &self.device_name())
            .field("status", &self.status())
            .finish()
    }
}

impl GraphExecutor {
    /// Creates an executor over an empty graph.
    ///
    /// Without a `context` the executor creates a private one, destroyed with the executor.
    pub fn new(context: Option<&Context>) -> Result<Self> {
        Self::create(context, None).record()
    }

    /// Creates an executor over a model. `format` is `"<format>"` to load `source` from a
    /// file or `"<format>:m"` to load it from memory.
    ///
    /// A model already loaded into the context under the same name is reused. The name is
    /// [`LoadOptions::name`], or the path of a file source.
    pub fn load(
        context: Option<&Context>,
        format: &str,
        source: impl Into<ModelSource>,
        options: LoadOptions,
    ) -> Result<Self> {
        Self::create(context, Some((format, source.into(), options))).record()
    }

    fn create(
        context: Option<&Context>,
        model: Option<(&str, ModelSource, LoadOptions)>,
    ) -> Result<Self> {
        let runtime = runtime()?;
        let (context, private) = match (context, &model) {
            (Some(context), _) => (context.clone(), false),
            (None, Some((_, source, _))) => (Context::new(source.name(), false), true),
            (None, None) => (Context::new("empty", false), true),
        };

        let result = match model {
            Some((format, source, options)) => {
                Self::load_model(runtime, &context, format, source, options)
            }
            None => {
                let name = format!("{}:{}", context.id(), uuid::Uuid::new_v4().simple());
                Ok((Graph::new(name), None))
            }
        };
        match result {
            Ok((graph, model)) => Ok(Self::from_parts(context, private, graph, model)),
            Err(err) => {
                if private {
                    context.destroy();
                }
                Err(err)
            }
        }
    }

    fn load_model(
        runtime: &Runtime,
        context: &Context,
        format: &str,
        source: ModelSource,
        options: LoadOptions,
    ) -> Result<(Graph, Option<String>)> {
        let format = ModelFormat::parse(format)?;
        format.check(&source)?;
        let loader = runtime.models().loader(&format.name)?;

        let name = match (&options.name, &source) {
            (Some(name), _) => name.clone(),
            (None, ModelSource::File(_)) => source.name(),
            (None, ModelSource::Memory(_)) => {
                let graph = loader.load(&source, &options)?;
                return Ok((graph, None));
            }
        };

        let name = format!("{}:{name}", context.id());
        let model = context.load_model(&name, || loader.load(&source, &options))?;
        let graph = Graph::clone(&model);
        let model = (!context.is_empty()).then_some(name);
        Ok((graph, model))
    }

    fn from_parts(context: Context, private: bool, graph: Graph, model: Option<String>) -> Self {
        let id = ExecutorId(uid::Id::new());
        let state = Arc::new(RunState::new(graph.name()));
        log::debug!(
            "graph created: {} ({id}) in context {}",
            graph.name(),
            context.name()
        );
        Self {
            id,
            context,
            private,
            model,
            graph: RwLock::new(graph),
            view: None,
            device_name: None,
            device: None,
            state,
            pending: Mutex::new(None),
        }
    }

    /// Builds a new executor over the union of `graphs`, which must be at least two, share one
    /// context, and all be before prerun. The sources are left untouched.
    pub fn merge(graphs: &[&GraphExecutor]) -> Result<Self> {
        Self::try_merge(graphs).record()
    }

    fn try_merge(graphs: &[&GraphExecutor]) -> Result<Self> {
        let [first, _, ..] = graphs else {
            return Err(Error::MergeArity(graphs.len()));
        };
        for exec in graphs {
            if exec.is_prerun() {
                return Err(Error::PrerunDone(exec.name().to_owned()));
            }
            if !exec.context.ptr_eq(&first.context) {
                return Err(Error::ContextMismatch);
            }
        }

        let sources = graphs
            .iter()
            .map(|exec| exec.graph.read().expect("failed to lock").clone())
            .collect_vec();
        let name = sources.iter().map(Graph::name).join("+");
        let merged = Graph::merge(name, &sources.iter().collect_vec())?;
        Ok(Self::from_parts(first.context.clone(), false, merged, None))
    }

    #[inline]
    pub fn id(&self) -> ExecutorId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.state.graph()
    }

    #[inline]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[inline]
    pub fn status(&self) -> ExecStatus {
        self.state.status()
    }

    #[inline]
    pub fn is_prerun(&self) -> bool {
        self.view.is_some()
    }

    /// The bound device after prerun, the requested one before.
    pub fn device_name(&self) -> Option<&str> {
        match &self.device {
            Some(device) => Some(device.name()),
            None => self.device_name.as_deref(),
        }
    }

    /// The graph queries run against: the optimized view after prerun, the graph before.
    fn view(&self) -> &RwLock<Graph> {
        match &self.view {
            Some(view) => view,
            None => &self.graph,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.view().read().expect("failed to lock")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Graph> {
        self.view().write().expect("failed to lock")
    }

    /// The graph for structural changes, which are only allowed before prerun.
    fn structure(&mut self) -> Result<&mut Graph> {
        match self.view {
            Some(_) => Err(Error::PrerunDone(self.name().to_owned())),
            None => Ok(self.graph.get_mut().expect("failed to lock")),
        }
    }

    fn node_handle(&self, id: NodeId) -> NodeHandle {
        let owner = self.id;
        NodeHandle { id, owner }
    }

    fn tensor_handle(&self, id: TensorId) -> TensorHandle {
        let owner = self.id;
        TensorHandle { id, owner }
    }

    fn check_node(&self, node: &NodeHandle) -> Result<NodeId> {
        match node.owner == self.id {
            true => Ok(node.id),
            false => Err(Error::Handle),
        }
    }

    fn check_tensor(&self, tensor: &TensorHandle) -> Result<TensorId> {
        match tensor.owner == self.id {
            true => Ok(tensor.id),
            false => Err(Error::Handle),
        }
    }

    fn with_node<R>(&self, node: &NodeHandle, f: impl FnOnce(&Node) -> Result<R>) -> Result<R> {
        let id = self.check_node(node).record()?;
        f(self.read().node(id).record()?).record()
    }

    fn with_tensor<R>(
        &self,
        tensor: &TensorHandle,
        f: impl FnOnce(&Tensor) -> Result<R>,
    ) -> Result<R> {
        let id = self.check_tensor(tensor).record()?;
        f(self.read().tensor(id).record()?).record()
    }

    fn with_tensor_mut<R>(
        &self,
        tensor: &TensorHandle,
        f: impl FnOnce(&mut Tensor) -> Result<R>,
    ) -> Result<R> {
        let id = self.check_tensor(tensor).record()?;
        f(self.write().tensor_mut(id).record()?).record()
    }

    fn with_attrs<R>(
        &self,
        entity: Entity<'_>,
        f: impl FnOnce(&mut AttrStore) -> Result<R>,
    ) -> Result<R> {
        let mut graph = self.write();
        let attrs = match entity {
            Entity::Graph => &mut graph.attrs,
            Entity::Node(node) => {
                let id = self.check_node(node).record()?;
                &mut graph.node_mut(id).record()?.attrs
            }
            Entity::Tensor(tensor) => {
                let id = self.check_tensor(tensor).record()?;
                &mut graph.tensor_mut(id).record()?.attrs
            }
        };
        f(attrs).record()
    }
}

/// Structure.
impl GraphExecutor {
    /// Sets the default layout for tensors created afterwards.
    pub fn set_layout(&mut self, layout: DataLayout) -> Result<()> {
        self.structure()
            .map(|graph| graph.set_layout(layout))
            .record()
    }

    pub fn layout(&self) -> DataLayout {
        self.read().layout()
    }

    /// Replaces the input node list. Nothing changes if any name is unknown.
    pub fn set_input_nodes(&mut self, names: &[&str]) -> Result<()> {
        self.structure()
            .and_then(|graph| graph.set_input_nodes(names))
            .record()
    }

    /// Replaces the output node list. Nothing changes if any name is unknown.
    pub fn set_output_nodes(&mut self, names: &[&str]) -> Result<()> {
        self.structure()
            .and_then(|graph| graph.set_output_nodes(names))
            .record()
    }

    /// Adds a node running the registered operator `op`.
    pub fn create_node(&mut self, name: &str, op: &str) -> Result<NodeHandle> {
        let op = runtime()
            .and_then(|runtime| runtime.ops().get(op))
            .record()?;
        let id = self
            .structure()
            .and_then(|graph| graph.add_node(name, op))
            .record()?;
        Ok(self.node_handle(id))
    }

    pub fn create_tensor(&mut self, name: &str, r#type: DataType) -> Result<TensorHandle> {
        let id = self
            .structure()
            .and_then(|graph| graph.add_tensor(name, r#type))
            .record()?;
        Ok(self.tensor_handle(id))
    }

    /// Connects `tensor` to input port `index` of `node`.
    pub fn set_node_input_tensor(
        &mut self,
        node: &NodeHandle,
        index: usize,
        tensor: &TensorHandle,
    ) -> Result<()> {
        let node = self.check_node(node).record()?;
        let tensor = self.check_tensor(tensor).record()?;
        self.structure()
            .and_then(|graph| graph.connect_input(node, index, tensor))
            .record()
    }

    /// Connects `tensor` to output port `index` of `node`, replacing its previous producer.
    pub fn set_node_output_tensor(
        &mut self,
        node: &NodeHandle,
        index: usize,
        tensor: &TensorHandle,
        kind: TensorKind,
    ) -> Result<()> {
        let node = self.check_node(node).record()?;
        let tensor = self.check_tensor(tensor).record()?;
        self.structure()
            .and_then(|graph| graph.connect_output(node, index, tensor, kind))
            .record()
    }
}

/// Queries.
impl GraphExecutor {
    pub fn node_count(&self) -> usize {
        self.read().node_count()
    }

    pub fn tensor_count(&self) -> usize {
        self.read().tensor_count()
    }

    /// The node at `index` in execution order.
    pub fn node_by_index(&self, index: usize) -> Result<NodeHandle> {
        let id = nth(self.read().seq(), "nodes", index).record()?;
        Ok(self.node_handle(id))
    }

    pub fn input_node_count(&self) -> usize {
        self.read().input_nodes().len()
    }

    pub fn input_node(&self, index: usize) -> Result<NodeHandle> {
        let id = nth(self.read().input_nodes(), "input nodes", index).record()?;
        Ok(self.node_handle(id))
    }

    pub fn output_node_count(&self) -> usize {
        self.read().output_nodes().len()
    }

    pub fn output_node(&self, index: usize) -> Result<NodeHandle> {
        let id = nth(self.read().output_nodes(), "output nodes", index).record()?;
        Ok(self.node_handle(id))
    }

    /// Output tensor `tensor` of input node `node`.
    pub fn input_tensor(&self, node: usize, tensor: usize) -> Result<TensorHandle> {
        let graph = self.read();
        let id = nth(graph.input_nodes(), "input nodes", node)
            .and_then(|id| graph.node(id))
            .and_then(|node| output_of(node, tensor))
            .record()?;
        Ok(self.tensor_handle(id))
    }

    /// Output tensor `tensor` of output node `node`.
    pub fn output_tensor(&self, node: usize, tensor: usize) -> Result<TensorHandle> {
        let graph = self.read();
        let id = nth(graph.output_nodes(), "output nodes", node)
            .and_then(|id| graph.node(id))
            .and_then(|node| output_of(node, tensor))
            .record()?;
        Ok(self.tensor_handle(id))
    }

    pub fn find_node(&self, name: &str) -> Result<NodeHandle> {
        let id = self
            .read()
            .find_node(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_owned()))
            .record()?;
        Ok(self.node_handle(id))
    }

    pub fn find_tensor(&self, name: &str) -> Result<TensorHandle> {
        let id = self
            .read()
            .find_tensor(name)
            .ok_or_else(|| Error::TensorNotFound(name.to_owned()))
            .record()?;
        Ok(self.tensor_handle(id))
    }

    /// Gives a node handle back.
    pub fn release_node(&self, node: NodeHandle) -> Result<()> {
        self.check_node(&node).record()?;
        log::debug!("{}: released {node}", self.name());
        Ok(())
    }

    pub fn node_name(&self, node: &NodeHandle) -> Result<String> {
        self.with_node(node, |node| Ok(node.name().to_owned()))
    }

    /// Name of the operator the node runs.
    pub fn node_op(&self, node: &NodeHandle) -> Result<String> {
        self.with_node(node, |node| Ok(node.op().name().to_owned()))
    }

    pub fn node_input_count(&self, node: &NodeHandle) -> Result<usize> {
        self.with_node(node, |node| Ok(node.input_count()))
    }

    pub fn node_output_count(&self, node: &NodeHandle) -> Result<usize> {
        self.with_node(node, |node| Ok(node.output_count()))
    }

    pub fn node_input_tensor(&self, node: &NodeHandle, index: usize) -> Result<TensorHandle> {
        let id = self.with_node(node, |node| input_of(node, index))?;
        Ok(self.tensor_handle(id))
    }

    pub fn node_output_tensor(&self, node: &NodeHandle, index: usize) -> Result<TensorHandle> {
        let id = self.with_node(node, |node| output_of(node, index))?;
        Ok(self.tensor_handle(id))
    }

    /// Human-readable listing of the current view.
    pub fn dump(&self) -> String {
        self.read().dump()
    }
}

/// Tensors.
impl GraphExecutor {
    pub fn tensor_name(&self, tensor: &TensorHandle) -> Result<String> {
        self.with_tensor(tensor, |tensor| Ok(tensor.name().to_owned()))
    }

    pub fn tensor_shape(&self, tensor: &TensorHandle) -> Result<Shape> {
        self.with_tensor(tensor, |tensor| Ok(tensor.shape().clone()))
    }

    /// Replaces the dims of the tensor's shape. Attached buffers are not resized.
    pub fn set_tensor_shape(&self, tensor: &TensorHandle, dims: &[usize]) -> Result<()> {
        self.with_tensor_mut(tensor, |tensor| tensor.reshape(dims))
    }

    pub fn tensor_data_type(&self, tensor: &TensorHandle) -> Result<DataType> {
        self.with_tensor(tensor, |tensor| Ok(tensor.data_type()))
    }

    pub fn set_tensor_data_type(&self, tensor: &TensorHandle, r#type: DataType) -> Result<()> {
        self.with_tensor_mut(tensor, |tensor| {
            tensor.set_data_type(r#type);
            Ok(())
        })
    }

    pub fn tensor_kind(&self, tensor: &TensorHandle) -> Result<TensorKind> {
        self.with_tensor(tensor, |tensor| Ok(tensor.kind()))
    }

    /// Byte size the tensor's shape and data type call for.
    pub fn tensor_buffer_size(&self, tensor: &TensorHandle) -> Result<usize> {
        self.with_tensor(tensor, |tensor| Ok(tensor.buffer_size()))
    }

    /// Lends the first `size` bytes of `buffer` to the tensor. The caller keeps ownership.
    pub fn set_tensor_buffer(
        &self,
        tensor: &TensorHandle,
        buffer: ExternalBuffer,
        size: usize,
    ) -> Result<()> {
        self.with_tensor_mut(tensor, |tensor| {
            tensor.attach(TensorMem::borrow(buffer, size)?);
            Ok(())
        })
    }

    /// Copies the tensor contents into `out`. Returns the number of bytes copied.
    pub fn tensor_data(&self, tensor: &TensorHandle, out: &mut [u8]) -> Result<usize> {
        self.with_tensor(tensor, |tensor| tensor.read(out))
    }

    /// Copies `data` into the tensor, allocating its buffer on first write.
    pub fn set_tensor_data(&self, tensor: &TensorHandle, data: &[u8]) -> Result<()> {
        self.with_tensor_mut(tensor, |tensor| tensor.write(data))
    }

    pub fn read_tensor<T: Scalar>(&self, tensor: &TensorHandle) -> Result<Vec<T>> {
        self.with_tensor(tensor, |tensor| tensor.read_as())
    }

    pub fn write_tensor<T: Scalar>(&self, tensor: &TensorHandle, data: &[T]) -> Result<()> {
        self.with_tensor_mut(tensor, |tensor| tensor.write_as(data))
    }
}

/// Attributes.
impl GraphExecutor {
    pub fn add_attr<'a>(
        &self,
        entity: impl Into<Entity<'a>>,
        key: &str,
        value: impl Into<AttrValue>,
    ) -> Result<()> {
        self.with_attrs(entity.into(), |attrs| attrs.add(key, value))
    }

    pub fn attr<'a>(&self, entity: impl Into<Entity<'a>>, key: &str) -> Result<AttrValue> {
        self.with_attrs(entity.into(), |attrs| attrs.get(key).cloned())
    }

    /// Reads an attribute as `T`. A value of another kind is an error.
    pub fn attr_as<'a, T: FromAttr>(&self, entity: impl Into<Entity<'a>>, key: &str) -> Result<T> {
        self.with_attrs(entity.into(), |attrs| attrs.get_as(key))
    }

    /// Copies the raw bytes of an attribute into `buf`, which must be large enough.
    pub fn read_attr<'a>(
        &self,
        entity: impl Into<Entity<'a>>,
        key: &str,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.with_attrs(entity.into(), |attrs| attrs.read_into(key, buf))
    }

    /// Overwrites an attribute with a value of the same kind and size.
    pub fn set_attr<'a>(
        &self,
        entity: impl Into<Entity<'a>>,
        key: &str,
        value: impl Into<AttrValue>,
    ) -> Result<()> {
        self.with_attrs(entity.into(), |attrs| attrs.set(key, value))
    }

    pub fn remove_attr<'a>(&self, entity: impl Into<Entity<'a>>, key: &str) -> Result<AttrValue> {
        self.with_attrs(entity.into(), |attrs| attrs.remove(key))
    }
}

/// Lifecycle.
impl GraphExecutor {
    /// Selects the device prerun binds. Without one the default device is tried first, then
    /// every other device.
    pub fn set_device(&mut self, name: &str) -> Result<()> {
        self.try_set_device(name).record()
    }

    fn try_set_device(&mut self, name: &str) -> Result<()> {
        if self.is_prerun() {
            return Err(Error::PrerunDone(self.name().to_owned()));
        }
        runtime()?.devices().get(name)?;
        self.device_name = Some(name.to_owned());
        Ok(())
    }

    /// Validates the graph, binds a device, builds the optimized view and reserves memory.
    /// On failure the executor is left as it was.
    pub fn prerun(&mut self) -> Result<()> {
        self.try_prerun().record()
    }

    fn try_prerun(&mut self) -> Result<()> {
        if self.is_prerun() {
            return Err(Error::PrerunDone(self.name().to_owned()));
        }

        #[cfg(feature = "trace")]
        let _span = tracing::info_span!("prerun", graph = self.name()).entered();

        let devices = runtime()?.devices();
        let candidates = match &self.device_name {
            Some(name) => vec![devices.get(name)?],
            None => {
                let default = devices.default_name();
                let others = devices.names().into_iter().filter(|name| name != &default);
                std::iter::once(default.clone())
                    .chain(others)
                    .map(|name| devices.get(&name))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        let graph = self.graph.get_mut().expect("failed to lock");
        graph.validate()?;

        for device in candidates {
            let mut view = pass::optimize(graph, device.as_ref())?;
            if !device.accepts(&view) {
                log::debug!("{}: rejected by {}", graph.name(), device.name());
                continue;
            }
            if let Err(err) = device.reserve(self.id, &mut view) {
                device.release(self.id);
                return Err(err);
            }

            log::info!("{}: bound to {}", graph.name(), device.name());
            self.device = Some(device);
            self.view = Some(Arc::new(RwLock::new(view)));
            self.state.set_status(ExecStatus::Ready);
            return Ok(());
        }
        Err(Error::NoDevice(graph.name().to_owned()))
    }

    /// Registers `hook` for `event`, replacing any hook registered before.
    pub fn set_event_hook(
        &self,
        event: GraphEvent,
        hook: impl Fn(&EventInfo<'_>) + Send + Sync + 'static,
    ) {
        if self.state.set_hook(event, Arc::new(hook)).is_some() {
            log::debug!("{}: {event} hook replaced", self.name());
        }
    }

    /// Runs the optimized view on the bound device.
    ///
    /// [`RunMode::Blocking`] waits for the run and returns its final status.
    /// [`RunMode::Async`] returns [`ExecStatus::Running`] once the run is dispatched.
    pub fn run(&self, mode: RunMode) -> Result<ExecStatus> {
        self.try_run(mode).record()
    }

    fn try_run(&self, mode: RunMode) -> Result<ExecStatus> {
        let (Some(device), Some(view)) = (&self.device, &self.view) else {
            return Err(Error::NotPrerun(self.name().to_owned()));
        };

        #[cfg(feature = "trace")]
        let _span = tracing::info_span!("run", graph = self.name()).entered();

        let (sender, receiver) = flume::bounded(1);
        {
            let mut pending = self.pending.lock().expect("failed to lock");
            if pending.is_some() && self.status() == ExecStatus::Running {
                return Err(Error::Running(self.name().to_owned()));
            }
            self.state.set_status(ExecStatus::Running);
            pending.replace(receiver);
        }

        let state = self.state.clone();
        let done: Completion = Box::new(move |result: Result<()>| {
            let (status, event) = match &result {
                Ok(()) => (ExecStatus::Done, GraphEvent::Done),
                Err(_) => (ExecStatus::Error, GraphEvent::Abort),
            };
            state.set_status(status);
            state.fire(event);
            _ = sender.send(result);
        });

        self.state.fire(GraphEvent::Start);
        log::debug!("{}: dispatched to {}", self.name(), device.name());
        let job = Job {
            owner: self.id,
            graph: view.clone(),
            state: self.state.clone(),
            done,
        };
        if let Err(err) = device.execute(job) {
            self.pending.lock().expect("failed to lock").take();
            self.state.set_status(ExecStatus::Error);
            return Err(err);
        }

        match mode {
            RunMode::Blocking => self.try_wait(WaitMode::Block),
            RunMode::Async => Ok(ExecStatus::Running),
        }
    }

    /// Waits for the current run. Returns the status, or the error the run ended with.
    ///
    /// [`WaitMode::Try`] returns [`ExecStatus::Running`] if the run is not complete.
    pub fn wait(&self, mode: WaitMode) -> Result<ExecStatus> {
        self.try_wait(mode).record()
    }

    fn try_wait(&self, mode: WaitMode) -> Result<ExecStatus> {
        let mut pending = self.pending.lock().expect("failed to lock");
        let Some(receiver) = pending.as_ref() else {
            return Ok(self.status());
        };
        let result = match mode {
            WaitMode::Block => receiver.recv().map_err(|_| self.disconnected()),
            WaitMode::Try => match receiver.try_recv() {
                Ok(result) => Ok(result),
                Err(flume::TryRecvError::Empty) => return Ok(ExecStatus::Running),
                Err(flume::TryRecvError::Disconnected) => Err(self.disconnected()),
            },
        };
        pending.take();
        drop(pending);

        result??;
        Ok(self.status())
    }

    /// Waits for the current run without blocking the thread.
    pub async fn wait_async(&self) -> Result<ExecStatus> {
        let receiver = self.pending.lock().expect("failed to lock").clone();
        let Some(receiver) = receiver else {
            return Ok(self.status());
        };
        let result = receiver.recv_async().await;
        self.pending.lock().expect("failed to lock").take();

        let result = match result {
            Ok(result) => result.map(|_| self.status()),
            Err(_) => Err(self.disconnected()),
        };
        result.record()
    }

    fn disconnected(&self) -> Error {
        self.state.set_status(ExecStatus::Error);
        let device = self.device_name().unwrap_or_default().to_owned();
        Error::Disconnected(device)
    }
}

/// Persistence.
impl GraphExecutor {
    /// Serializes the current view with the saver registered for `format`.
    pub fn save_to_vec(&self, format: &str) -> Result<Vec<u8>> {
        ModelFormat::parse(format)
            .and_then(|format| runtime()?.models().saver(&format.name))
            .and_then(|saver| saver.save(&self.read()))
            .record()
    }

    pub fn save(&self, format: &str, path: impl AsRef<Path>) -> Result<()> {
        let data = self.save_to_vec(format)?;
        std::fs::write(path, data).map_err(Error::from).record()
    }
}

impl Drop for GraphExecutor {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().expect("failed to lock").take();
        if let Some(receiver) = pending {
            if self.state.status() == ExecStatus::Running {
                log::debug!("{}: waiting for the run in flight", self.name());
                _ = receiver.recv();
            }
        }
        if let Some(device) = self.device.take() {
            device.release(self.id);
        }
        if let Some(model) = &self.model {
            self.context.release_model(model);
        }
        if self.private {
            self.context.clone().destroy();
        }
        log::debug!("graph destroyed: {} ({})", self.name(), self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex, Once},
        time::Duration,
    };

    use itertools::Itertools;

    use super::{Entity, ExecStatus, GraphEvent, GraphExecutor, RunMode, WaitMode};
    use crate::{
        context::Context,
        device::{CpuBuilder, KernelContext},
        error::{Error, ErrorKind, Result},
        ir::{AttrValue, DataType, ExternalBuffer, MAX_ELEMENTS, MAX_PORTS, OpDef, TensorKind},
        model::LoadOptions,
        runtime::runtime,
    };

    const TEST_DEVICE: &str = "test-cpu";

    fn relu(context: &mut KernelContext<'_>) -> Result<()> {
        let x: Vec<f32> = context.input(0)?.read_as()?;
        let y = x.into_iter().map(|x| x.max(0.0)).collect_vec();
        context.output(0)?.write_as(&y)
    }

    fn fail(_context: &mut KernelContext<'_>) -> Result<()> {
        Err(Error::NotImplemented("fail"))
    }

    fn setup() {
        static SETUP: Once = Once::new();
        SETUP.call_once(|| {
            let runtime = runtime().unwrap();
            runtime.ops().register(OpDef::new("Fail", 1, 1)).unwrap();
            let device = CpuBuilder::new()
                .name(TEST_DEVICE)
                .workers(2)
                .add_kernel("ReLU", relu)
                .add_kernel("Fail", fail)
                .build()
                .unwrap();
            runtime.devices().register(Arc::new(device)).unwrap();
        });
    }

    /// `{prefix}input -> {prefix}x -> {prefix}{op} -> {prefix}y`, with 4 elements each.
    fn build(exec: &mut GraphExecutor, prefix: &str, op: &str) {
        let input = exec.create_node(&format!("{prefix}input"), "Input").unwrap();
        let node = exec.create_node(&format!("{prefix}{op}"), op).unwrap();
        let x = exec.create_tensor(&format!("{prefix}x"), DataType::F32).unwrap();
        let y = exec.create_tensor(&format!("{prefix}y"), DataType::F32).unwrap();
        exec.set_node_output_tensor(&input, 0, &x, TensorKind::Input)
            .unwrap();
        exec.set_node_input_tensor(&node, 0, &x).unwrap();
        exec.set_node_output_tensor(&node, 0, &y, TensorKind::Var)
            .unwrap();
        exec.set_input_nodes(&[&format!("{prefix}input")]).unwrap();
        exec.set_output_nodes(&[&format!("{prefix}{op}")]).unwrap();
        exec.set_tensor_shape(&x, &[4]).unwrap();
        exec.set_tensor_shape(&y, &[4]).unwrap();
    }

    fn graph(op: &str) -> GraphExecutor {
        setup();
        let mut exec = GraphExecutor::new(None).unwrap();
        build(&mut exec, "", op);
        exec
    }

    fn events(exec: &GraphExecutor) -> Arc<Mutex<Vec<GraphEvent>>> {
        let events = Arc::new(Mutex::new(vec![]));
        for event in [GraphEvent::Start, GraphEvent::Abort, GraphEvent::Done] {
            let sink = events.clone();
            exec.set_event_hook(event, move |info| sink.lock().unwrap().push(info.event));
        }
        events
    }

    #[test]
    fn test_const_graph() {
        setup();
        let mut exec = GraphExecutor::new(None).unwrap();
        let node = exec.create_node("n0", "Const").unwrap();
        let tensor = exec.create_tensor("t0", DataType::F32).unwrap();
        exec.set_node_output_tensor(&node, 0, &tensor, TensorKind::Const)
            .unwrap();
        exec.set_output_nodes(&["n0"]).unwrap();

        assert_eq!(exec.node_count(), 1);
        assert_eq!(exec.input_node_count(), 0);
        assert_eq!(exec.output_node_count(), 1);
        let output = exec.output_tensor(0, 0).unwrap();
        assert_eq!(exec.tensor_name(&output).unwrap(), "t0");
        assert_eq!(exec.tensor_kind(&output).unwrap(), TensorKind::Const);
        assert_eq!(exec.node_op(&node).unwrap(), "Const");

        let err = exec.output_tensor(0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = exec.input_node(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = exec.set_output_nodes(&["missing"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(exec.output_node_count(), 1);
        let err = exec.create_node("n1", "Missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_unconnected_input() {
        setup();
        let mut exec = GraphExecutor::new(None).unwrap();
        let node = exec.create_node("relu", "ReLU").unwrap();
        exec.set_output_nodes(&["relu"]).unwrap();

        let err = exec.prerun().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(exec.status(), ExecStatus::Created);
        assert!(!exec.is_prerun());

        let err = exec.node_input_tensor(&node, 0).unwrap_err();
        assert!(matches!(err, Error::Unconnected { port: 0, .. }));
        let err = exec.node_input_tensor(&node, 1).unwrap_err();
        assert!(matches!(err, Error::Index { .. }));

        exec.create_tensor("in", DataType::F32).unwrap();
        let err = exec.create_tensor("in", DataType::F32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_unconnected_graph_input() {
        setup();
        let mut exec = GraphExecutor::new(None).unwrap();
        exec.create_node("in", "ReLU").unwrap();
        exec.set_input_nodes(&["in"]).unwrap();
        exec.set_output_nodes(&["in"]).unwrap();

        let err = exec.prerun().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(exec.status(), ExecStatus::Created);
        assert!(!exec.is_prerun());

        exec.create_tensor("t", DataType::F32).unwrap();
        exec.create_node("n", "ReLU").unwrap();
        assert_eq!(exec.node_count(), 2);
    }

    #[test]
    fn test_shape_overflow() {
        let exec = graph("ReLU");
        let tensor = exec.find_tensor("x").unwrap();
        let err = exec.set_tensor_shape(&tensor, &[usize::MAX, 2]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = exec
            .set_tensor_shape(&tensor, &[MAX_ELEMENTS + 1])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(exec.tensor_shape(&tensor).unwrap().dims(), [4]);
        assert_eq!(exec.tensor_buffer_size(&tensor).unwrap(), 16);
    }

    #[test]
    fn test_port_out_of_range() {
        let mut exec = graph("ReLU");
        let node = exec.find_node("ReLU").unwrap();
        let tensor = exec.find_tensor("x").unwrap();

        let err = exec
            .set_node_input_tensor(&node, usize::MAX, &tensor)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = exec
            .set_node_output_tensor(&node, MAX_PORTS, &tensor, TensorKind::Var)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(exec.node_input_count(&node).unwrap(), 1);
        assert_eq!(exec.node_output_count(&node).unwrap(), 1);

        exec.prerun().unwrap();
    }

    #[test]
    fn test_tensor_data() {
        setup();
        let mut exec = GraphExecutor::new(None).unwrap();
        let tensor = exec.create_tensor("data", DataType::F32).unwrap();
        exec.set_tensor_shape(&tensor, &[1, 3, 224, 224]).unwrap();
        let size = exec.tensor_buffer_size(&tensor).unwrap();
        assert_eq!(size, 3 * 224 * 224 * 4);

        let mut out = vec![0u8; size];
        let err = exec.tensor_data(&tensor, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoData);

        let data = vec![7u8; size];
        exec.set_tensor_data(&tensor, &data).unwrap();
        let err = exec
            .set_tensor_data(&tensor, &vec![1u8; size + 1])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMemory);

        assert_eq!(exec.tensor_data(&tensor, &mut out).unwrap(), size);
        assert_eq!(out, data);
        let err = exec.tensor_data(&tensor, &mut out[1..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMemory);

        let err = exec.read_tensor::<i32>(&tensor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        exec.set_tensor_data_type(&tensor, DataType::U8).unwrap();
        assert_eq!(exec.tensor_buffer_size(&tensor).unwrap(), size / 4);
    }

    #[test]
    fn test_external_buffer() {
        setup();
        let mut exec = GraphExecutor::new(None).unwrap();
        let tensor = exec.create_tensor("x", DataType::F32).unwrap();
        exec.set_tensor_shape(&tensor, &[4]).unwrap();

        let buffer = ExternalBuffer::zeroed(16);
        let err = exec
            .set_tensor_buffer(&tensor, buffer.clone(), 32)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        exec.set_tensor_buffer(&tensor, buffer.clone(), 16).unwrap();
        exec.write_tensor(&tensor, &[1.0f32, 2.0, 3.0, 4.0])
            .unwrap();
        let bytes: &[u8] = bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]);
        assert_eq!(&buffer.read()[..], bytes);
    }

    #[test]
    fn test_attrs() {
        setup();
        let mut exec = GraphExecutor::new(None).unwrap();
        let node = exec.create_node("relu", "ReLU").unwrap();

        exec.add_attr(Entity::Graph, "batch", 4).unwrap();
        let err = exec.add_attr(Entity::Graph, "batch", 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        exec.set_attr(Entity::Graph, "batch", 8).unwrap();
        assert_eq!(exec.attr_as::<i32>(Entity::Graph, "batch").unwrap(), 8);
        let err = exec.attr_as::<f32>(Entity::Graph, "batch").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = exec.set_attr(Entity::Graph, "batch", 1.0f32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        exec.add_attr(&node, "slope", 0.5f32).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(exec.read_attr(&node, "slope", &mut buf).unwrap(), 4);
        assert_eq!(f32::from_ne_bytes(buf), 0.5);
        assert_eq!(exec.remove_attr(&node, "slope").unwrap(), AttrValue::Float(0.5));
        let err = exec.attr(&node, "slope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_foreign_handle() {
        let first = graph("ReLU");
        let second = graph("ReLU");
        let node = first.find_node("ReLU").unwrap();
        let tensor = first.find_tensor("x").unwrap();

        let err = second.node_name(&node).unwrap_err();
        assert!(matches!(err, Error::Handle));
        let err = second.tensor_shape(&tensor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        second.release_node(node.clone()).unwrap_err();
        first.release_node(node).unwrap();
    }

    #[test]
    fn test_frozen_after_prerun() {
        let mut exec = graph("ReLU");
        let err = exec.run(RunMode::Blocking).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        exec.prerun().unwrap();
        assert_eq!(exec.status(), ExecStatus::Ready);
        assert_eq!(exec.device_name(), Some(TEST_DEVICE));

        let node = exec.find_node("ReLU").unwrap();
        let tensor = exec.find_tensor("y").unwrap();
        let errs = [
            exec.prerun().unwrap_err(),
            exec.set_device(TEST_DEVICE).unwrap_err(),
            exec.create_node("n", "ReLU").unwrap_err(),
            exec.create_tensor("t", DataType::F32).unwrap_err(),
            exec.set_node_input_tensor(&node, 0, &tensor).unwrap_err(),
            exec.set_node_output_tensor(&node, 0, &tensor, TensorKind::Var)
                .unwrap_err(),
            exec.set_input_nodes(&["ReLU"]).unwrap_err(),
            exec.set_output_nodes(&["input"]).unwrap_err(),
            exec.set_layout(Default::default()).unwrap_err(),
        ];
        for err in errs {
            assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        }

        exec.set_tensor_shape(&tensor, &[2, 2]).unwrap();
        assert_eq!(exec.tensor_shape(&tensor).unwrap().dims(), [2, 2]);
        assert_eq!(exec.node_count(), 2);
        assert_eq!(exec.node_name(&exec.node_by_index(0).unwrap()).unwrap(), "input");
    }

    #[test]
    fn test_run_blocking() {
        let mut exec = graph("ReLU");
        exec.prerun().unwrap();
        let events = events(&exec);

        let x = exec.input_tensor(0, 0).unwrap();
        let y = exec.output_tensor(0, 0).unwrap();
        exec.write_tensor(&x, &[-1.0f32, 2.0, -3.0, 4.0]).unwrap();
        assert_eq!(exec.run(RunMode::Blocking).unwrap(), ExecStatus::Done);
        assert_eq!(exec.read_tensor::<f32>(&y).unwrap(), [0.0, 2.0, 0.0, 4.0]);
        assert_eq!(*events.lock().unwrap(), [GraphEvent::Start, GraphEvent::Done]);

        exec.write_tensor(&x, &[1.0f32, -2.0, 3.0, -4.0]).unwrap();
        assert_eq!(exec.run(RunMode::Blocking).unwrap(), ExecStatus::Done);
        assert_eq!(exec.read_tensor::<f32>(&y).unwrap(), [1.0, 0.0, 3.0, 0.0]);
        assert_eq!(exec.wait(WaitMode::Block).unwrap(), ExecStatus::Done);
    }

    #[test]
    fn test_run_async() {
        let mut exec = graph("ReLU");
        exec.prerun().unwrap();
        let events = events(&exec);

        assert_eq!(exec.run(RunMode::Async).unwrap(), ExecStatus::Running);
        assert_eq!(exec.wait(WaitMode::Block).unwrap(), ExecStatus::Done);
        assert_eq!(*events.lock().unwrap(), [GraphEvent::Start, GraphEvent::Done]);

        exec.run(RunMode::Async).unwrap();
        let status = loop {
            match exec.wait(WaitMode::Try).unwrap() {
                ExecStatus::Running => std::thread::sleep(Duration::from_millis(1)),
                status => break status,
            }
        };
        assert_eq!(status, ExecStatus::Done);
    }

    #[tokio::test]
    async fn test_wait_async() {
        let mut exec = graph("ReLU");
        exec.prerun().unwrap();
        let x = exec.input_tensor(0, 0).unwrap();
        exec.write_tensor(&x, &[-1.0f32; 4]).unwrap();

        exec.run(RunMode::Async).unwrap();
        assert_eq!(exec.wait_async().await.unwrap(), ExecStatus::Done);
        let y = exec.output_tensor(0, 0).unwrap();
        assert_eq!(exec.read_tensor::<f32>(&y).unwrap(), [0.0; 4]);
    }

    #[test]
    fn test_abort() {
        let mut exec = graph("Fail");
        exec.prerun().unwrap();
        let events = events(&exec);

        let err = exec.run(RunMode::Blocking).unwrap_err();
        assert!(matches!(err, Error::NotImplemented("fail")));
        assert_eq!(exec.status(), ExecStatus::Error);
        assert_eq!(*events.lock().unwrap(), [GraphEvent::Start, GraphEvent::Abort]);
    }

    #[test]
    fn test_device_selection() {
        let mut exec = graph("ReLU");
        let err = exec.set_device("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        exec.set_device("cpu").unwrap();
        let err = exec.prerun().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoDevice);
        assert_eq!(exec.status(), ExecStatus::Created);

        exec.set_device(TEST_DEVICE).unwrap();
        exec.prerun().unwrap();
        assert_eq!(exec.device_name(), Some(TEST_DEVICE));
    }

    #[test]
    fn test_merge() {
        setup();
        let context = Context::new("merge", false);
        let mut first = GraphExecutor::new(Some(&context)).unwrap();
        build(&mut first, "a.", "ReLU");
        let mut second = GraphExecutor::new(Some(&context)).unwrap();
        build(&mut second, "b.", "ReLU");

        let err = GraphExecutor::merge(&[&first]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(first.node_count(), 2);

        let mut merged = GraphExecutor::merge(&[&first, &second]).unwrap();
        assert_eq!(merged.node_count(), 4);
        assert_eq!(merged.input_node_count(), 2);
        assert_eq!(merged.output_node_count(), 2);
        assert_eq!(first.node_count(), 2);
        assert!(merged.context().ptr_eq(&context));
        assert_eq!(merged.name(), format!("{}+{}", first.name(), second.name()));

        merged.prerun().unwrap();
        assert_eq!(merged.run(RunMode::Blocking).unwrap(), ExecStatus::Done);

        let other = graph("ReLU");
        let err = GraphExecutor::merge(&[&first, &other]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        second.prerun().unwrap();
        let err = GraphExecutor::merge(&[&first, &second]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        for exec in [&first, &other] {
            assert_eq!(exec.node_count(), 2);
            assert_eq!(exec.tensor_count(), 2);
        }
        assert_eq!(second.node_count(), 2);
        assert!(!first.is_prerun());
        first.create_node("extra", "ReLU").unwrap();
    }

    fn weights(name: &str) -> Vec<u8> {
        setup();
        let mut exec = GraphExecutor::new(None).unwrap();
        let node = exec.create_node(name, "Const").unwrap();
        let tensor = exec.create_tensor(name, DataType::F32).unwrap();
        exec.set_node_output_tensor(&node, 0, &tensor, TensorKind::Const)
            .unwrap();
        exec.set_tensor_shape(&tensor, &[2, 2]).unwrap();
        exec.write_tensor(&tensor, &[1.0f32, 2.0, 3.0, 4.0])
            .unwrap();
        exec.save_to_vec("safetensors").unwrap()
    }

    fn named(name: &str) -> LoadOptions {
        LoadOptions {
            name: Some(name.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_memory() {
        let data = weights("w");

        let exec = GraphExecutor::load(None, "safetensors:m", data.clone(), named("w")).unwrap();
        let context = exec.context().clone();
        assert_eq!(context.models().len(), 1);
        let tensor = exec.output_tensor(0, 0).unwrap();
        assert_eq!(exec.tensor_shape(&tensor).unwrap().dims(), [2, 2]);
        assert_eq!(
            exec.read_tensor::<f32>(&tensor).unwrap(),
            [1.0, 2.0, 3.0, 4.0]
        );
        drop(exec);
        assert!(context.models().is_empty());

        let exec =
            GraphExecutor::load(None, "safetensors:m", data.clone(), LoadOptions::default())
                .unwrap();
        assert!(exec.context().models().is_empty());
        assert!(exec.find_tensor("w").is_ok());

        let err = GraphExecutor::load(None, "safetensors", data.clone(), LoadOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = GraphExecutor::load(None, "onnx:m", data, LoadOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = GraphExecutor::load(
            None,
            "safetensors:m",
            Vec::<u8>::new(),
            LoadOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_distinct_memory_models() {
        let context = Context::new("blobs", false);
        let first =
            GraphExecutor::load(Some(&context), "safetensors:m", weights("a"), Default::default())
                .unwrap();
        let second =
            GraphExecutor::load(Some(&context), "safetensors:m", weights("b"), Default::default())
                .unwrap();
        assert!(first.find_tensor("a").is_ok());
        assert!(second.find_tensor("b").is_ok());
        assert!(second.find_tensor("a").is_err());

        let third =
            GraphExecutor::load(Some(&context), "safetensors:m", weights("c"), named("c")).unwrap();
        let fourth =
            GraphExecutor::load(Some(&context), "safetensors:m", weights("d"), named("d")).unwrap();
        assert!(third.find_tensor("c").is_ok());
        assert!(fourth.find_tensor("d").is_ok());
        assert_eq!(context.models().len(), 2);
    }

    #[test]
    fn test_model_reuse() {
        let data = weights("w");
        let context = Context::new("models", false);

        let first =
            GraphExecutor::load(Some(&context), "safetensors:m", data.clone(), named("w"))
                .unwrap();
        let second =
            GraphExecutor::load(Some(&context), "safetensors:m", data.clone(), named("w"))
                .unwrap();
        assert_eq!(context.models().len(), 1);
        assert_eq!(first.node_count(), second.node_count());

        drop(first);
        assert_eq!(context.models().len(), 1);
        let third =
            GraphExecutor::load(Some(&context), "safetensors:m", data, named("w"))
                .unwrap();
        assert!(third.find_tensor("w").is_ok());

        drop(second);
        assert_eq!(context.models().len(), 1);
        drop(third);
        assert!(context.models().is_empty());
    }

    #[test]
    fn test_save_file() {
        let data = weights("w");
        let exec =
            GraphExecutor::load(None, "safetensors:m", data, LoadOptions::default()).unwrap();
        let path = std::env::temp_dir().join(format!("weft-{}.safetensors", exec.id()));
        exec.save("safetensors", &path).unwrap();

        let loaded =
            GraphExecutor::load(None, "safetensors", path.clone(), LoadOptions::default())
                .unwrap();
        assert_eq!(loaded.node_count(), 1);
        assert_eq!(loaded.context().name(), path.display().to_string());
        std::fs::remove_file(&path).unwrap();

        let err = exec.save_to_vec("onnx").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
