//! Execution devices. A device inspects a prepared graph, reserves its memory and runs it
//! when asked, reporting completion through the [`Job`]'s callback.

use std::sync::{Arc, RwLock};

use itertools::Itertools;
use rustc_hash::FxHashMap as HashMap;

use crate::{
    error::{Error, Result},
    exec::{ExecutorId, RunState},
    ir::Graph,
};

pub use cpu::{CPU_DEVICE, Cpu, CpuBuilder, Kernel, KernelContext};

pub mod cpu;

/// Callback invoked exactly once when a job finishes, successfully or not.
pub type Completion = Box<dyn FnOnce(Result<()>) + Send>;

/// One run of a prepared graph.
pub struct Job {
    /// The executor that submitted the job.
    pub owner: ExecutorId,
    /// The optimized view to execute.
    pub graph: Arc<RwLock<Graph>>,
    /// Lets the device signal lifecycle events such as suspension.
    pub state: Arc<RunState>,
    pub done: Completion,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// A backend able to execute graphs.
pub trait DeviceExecutor: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Whether every node of `graph` can run on this device.
    fn accepts(&self, graph: &Graph) -> bool;

    /// Device specific rewrites of the optimized view, applied after the generic passes.
    fn optimize(&self, _graph: &mut Graph) -> Result<()> {
        Ok(())
    }

    /// Reserves the memory `graph` needs on behalf of `owner`.
    fn reserve(&self, owner: ExecutorId, graph: &mut Graph) -> Result<()>;

    /// Queues `job`. Returns once the job is accepted; completion is reported through
    /// [`Job::done`].
    fn execute(&self, job: Job) -> Result<()>;

    /// Releases everything reserved on behalf of `owner`.
    fn release(&self, owner: ExecutorId);
}

/// Devices known to the runtime, looked up by exact name.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Arc<dyn DeviceExecutor>>>,
    default: RwLock<String>,
}

impl DeviceRegistry {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            devices: Default::default(),
            default: RwLock::new(default.into()),
        }
    }

    pub fn register(&self, device: Arc<dyn DeviceExecutor>) -> Result<()> {
        let mut devices = self.devices.write().expect("failed to lock");
        let name = device.name().to_owned();
        if devices.contains_key(&name) {
            return Err(Error::DeviceExists(name));
        }
        log::info!("device registered: {name}");
        devices.insert(name, device);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DeviceExecutor>> {
        self.devices
            .read()
            .expect("failed to lock")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices
            .read()
            .expect("failed to lock")
            .contains_key(name)
    }

    /// Names of all registered devices, sorted.
    pub fn names(&self) -> Vec<String> {
        self.devices
            .read()
            .expect("failed to lock")
            .keys()
            .cloned()
            .sorted()
            .collect()
    }

    pub fn default_name(&self) -> String {
        self.default.read().expect("failed to lock").clone()
    }

    pub fn default_device(&self) -> Result<Arc<dyn DeviceExecutor>> {
        self.get(&self.default_name())
    }

    /// Makes `name` the default device. It must be registered.
    pub fn set_default(&self, name: &str) -> Result<()> {
        if !self.contains(name) {
            return Err(Error::DeviceNotFound(name.to_owned()));
        }
        *self.default.write().expect("failed to lock") = name.to_owned();
        Ok(())
    }
}
