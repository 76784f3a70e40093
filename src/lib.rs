//! Execution core of a neural network inference runtime.
//!
//! A [`GraphExecutor`] wraps a computation graph, built node by node or loaded from a model
//! format, and takes it through its lifecycle: construction, [`prerun`](GraphExecutor::prerun)
//! onto a device, and any number of blocking or asynchronous runs. Graphs share loaded models
//! through a [`Context`]. Operators, devices and model formats live in the process-wide
//! [`Runtime`].

pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod exec;
pub mod ir;
pub mod model;
pub mod runtime;

pub use config::RuntimeConfig;
pub use context::{Context, ContextId};
pub use device::{CPU_DEVICE, Cpu, CpuBuilder, DeviceExecutor, Kernel, KernelContext};
pub use error::{Error, ErrorKind, Result, clear_last_error, last_error};
pub use exec::{
    Entity, EventInfo, ExecStatus, ExecutorId, GraphEvent, GraphExecutor, NodeHandle, RunMode,
    TensorHandle, WaitMode,
};
pub use ir::{AttrValue, DataLayout, DataType, ExternalBuffer, Shape, TensorKind};
pub use model::{LoadOptions, ModelSource};
pub use runtime::{
    Plugin, Runtime, default_device, init, init_with, release, runtime, set_default_device,
    version,
};
