use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap as HashMap;

use super::{DeviceExecutor, Job};
use crate::{
    error::{Error, Result},
    exec::ExecutorId,
    ir::{AttrStore, Graph, Node, NodeId, Tensor},
};

/// Name of the built-in CPU device.
pub const CPU_DEVICE: &str = "cpu";

/// Runs one node on the CPU.
pub type Kernel = fn(&mut KernelContext<'_>) -> Result<()>;

type KernelTable = HashMap<String, Kernel>;

/// The view a [`Kernel`] gets of the node it runs.
pub struct KernelContext<'a> {
    graph: &'a mut Graph,
    node: NodeId,
}

impl KernelContext<'_> {
    #[inline]
    pub fn graph(&self) -> &Graph {
        self.graph
    }

    #[inline]
    pub fn node(&self) -> Result<&Node> {
        self.graph.node(self.node)
    }

    #[inline]
    pub fn attrs(&self) -> Result<&AttrStore> {
        Ok(&self.node()?.attrs)
    }

    pub fn input(&self, index: usize) -> Result<&Tensor> {
        let node = self.node()?;
        let id = node.input(index).ok_or_else(|| Error::Unconnected {
            node: node.name().to_owned(),
            port: index,
        })?;
        self.graph.tensor(id)
    }

    pub fn output(&mut self, index: usize) -> Result<&mut Tensor> {
        let node = self.node()?;
        let id = node.output(index).ok_or_else(|| Error::Unconnected {
            node: node.name().to_owned(),
            port: index,
        })?;
        self.graph.tensor_mut(id)
    }
}

/// Executes nodes by looking their operator up in the kernel table.
#[derive(Debug, Clone)]
struct Backend {
    kernels: Arc<KernelTable>,
}

impl Backend {
    fn execute(&self, graph: &mut Graph) -> Result<()> {
        let seq = graph.seq().to_vec();
        for id in seq {
            let node = graph.node(id)?;
            let op = node.op().name();
            let Some(kernel) = self.kernels.get(op).copied() else {
                return Err(Error::Kernel {
                    node: node.name().to_owned(),
                    message: format!("no kernel for {op}"),
                });
            };

            #[cfg(feature = "trace")]
            let _span = tracing::trace_span!("kernel", node = node.name(), op).entered();

            let mut context = KernelContext {
                graph: &mut *graph,
                node: id,
            };
            kernel(&mut context)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Cpu {
    name: String,
    /// Operators that the device is able to execute.
    kernels: Arc<KernelTable>,
    /// Sends jobs to the worker pool.
    sender: flume::Sender<Job>,
    /// Bytes reserved per executor.
    reserved: Arc<RwLock<HashMap<ExecutorId, usize>>>,
}

impl Cpu {
    #[inline]
    pub fn builder() -> CpuBuilder {
        CpuBuilder::new()
    }

    /// Bytes currently reserved on behalf of `owner`.
    pub fn reserved(&self, owner: ExecutorId) -> usize {
        self.reserved
            .read()
            .expect("failed to lock")
            .get(&owner)
            .copied()
            .unwrap_or_default()
    }
}

impl DeviceExecutor for Cpu {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, graph: &Graph) -> bool {
        match graph
            .nodes()
            .find(|(_, node)| !self.kernels.contains_key(node.op().name()))
        {
            Some((_, node)) => {
                log::debug!("{}: no kernel for {} ({})", self.name, node.name(), node.op());
                false
            }
            None => true,
        }
    }

    fn reserve(&self, owner: ExecutorId, graph: &mut Graph) -> Result<()> {
        let bytes: usize = graph
            .tensors_mut()
            .map(|(_, tensor)| match tensor.reserve() {
                true => tensor.buffer_size(),
                false => 0,
            })
            .sum();
        log::trace!("{}: reserved {bytes} bytes for {owner}", self.name);
        *self
            .reserved
            .write()
            .expect("failed to lock")
            .entry(owner)
            .or_default() += bytes;
        Ok(())
    }

    fn execute(&self, job: Job) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|_| Error::Disconnected(self.name.clone()))
    }

    fn release(&self, owner: ExecutorId) {
        if let Some(bytes) = self
            .reserved
            .write()
            .expect("failed to lock")
            .remove(&owner)
        {
            log::trace!("{}: released {bytes} bytes of {owner}", self.name);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CpuBuilder {
    name: String,
    workers: usize,
    kernels: KernelTable,
}

impl Default for CpuBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn noop(_: &mut KernelContext<'_>) -> Result<()> {
    Ok(())
}

impl CpuBuilder {
    /// A builder for the device named [`CPU_DEVICE`] with the `Const` and `Input` kernels.
    pub fn new() -> Self {
        let workers = std::thread::available_parallelism().map_or(1, usize::from);
        Self {
            name: CPU_DEVICE.to_owned(),
            workers,
            kernels: Default::default(),
        }
        .add_kernel("Const", noop)
        .add_kernel("Input", noop)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the size of the worker pool. At least one worker is always spawned.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Registers the kernel for `op`, replacing any previous one.
    pub fn add_kernel(mut self, op: impl Into<String>, kernel: Kernel) -> Self {
        self.kernels.insert(op.into(), kernel);
        self
    }

    pub fn build(self) -> Result<Cpu> {
        let kernels = Arc::new(self.kernels);
        let (sender, receiver) = flume::unbounded();
        for index in 0..self.workers {
            let backend = Backend {
                kernels: kernels.clone(),
            };
            let receiver = receiver.clone();
            std::thread::Builder::new()
                .name(format!("{}-{index}", self.name))
                .spawn(move || serve(backend, receiver))?;
        }
        log::info!("{}: {} workers", self.name, self.workers);

        let reserved = Default::default();
        Ok(Cpu {
            name: self.name,
            kernels,
            sender,
            reserved,
        })
    }
}

fn serve(backend: Backend, receiver: flume::Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        let Job { owner, graph, done, .. } = job;
        let result = {
            let mut graph = graph.write().expect("failed to lock");
            backend.execute(&mut graph)
        };
        if let Err(err) = &result {
            log::error!("{owner}: {err}");
        }
        done(result);
    }
}
