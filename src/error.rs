use std::sync::{Arc, Mutex};

use derive_more::Display;
use thiserror::Error;

use crate::ir::num::DataType;

/// Coarse classification of every failure the runtime reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    #[display("invalid argument")]
    InvalidArgument,
    #[display("not found")]
    NotFound,
    #[display("already exists")]
    AlreadyExists,
    #[display("permission denied")]
    PermissionDenied,
    #[display("no memory")]
    NoMemory,
    #[display("no data")]
    NoData,
    #[display("no device")]
    NoDevice,
    #[display("not implemented")]
    NotImplemented,
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("index {index} out of range for {what} (len {len})")]
    Index {
        what: &'static str,
        index: usize,
        len: usize,
    },
    #[error("malformed name: {0:?}")]
    Name(String),
    #[error("node list must not be empty")]
    EmptyNodeList,
    #[error("shape of {0} dims exceeds the supported maximum")]
    Rank(usize),
    #[error("shape {0:?} holds too many elements")]
    Shape(Vec<usize>),
    #[error("data type error: expected {0}, found {1}")]
    Type(DataType, DataType),
    #[error("attribute {key} holds {found}, not {expected}")]
    AttrType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("attribute {key} has size {stored}, not {given}")]
    AttrSize {
        key: String,
        stored: usize,
        given: usize,
    },
    #[error("port {port} of node {node} is not connected")]
    Unconnected { node: String, port: usize },
    #[error("graph {0} contains a cycle")]
    Cycle(String),
    #[error("handle was not issued by this graph")]
    Handle,
    #[error("graphs belong to different contexts")]
    ContextMismatch,
    #[error("merge needs at least two graphs, got {0}")]
    MergeArity(usize),
    #[error("model source does not match format {0}")]
    Source(String),
    #[error("external buffer holds {available} bytes, {requested} requested")]
    External { requested: usize, available: usize },
    #[error("model error: {0}")]
    Model(String),
    #[error("kernel of node {node} failed: {message}")]
    Kernel { node: String, message: String },
    #[error("config error: {0}")]
    Config(String),
    #[error("plugin {0} failed to initialize")]
    Plugin(String),
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("tensor not found: {0}")]
    TensorNotFound(String),
    #[error("operator not found: {0}")]
    OpNotFound(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("model format not found: {0}")]
    FormatNotFound(String),
    #[error("attribute not found: {0}")]
    AttrNotFound(String),

    #[error("node already exists: {0}")]
    NodeExists(String),
    #[error("tensor already exists: {0}")]
    TensorExists(String),
    #[error("operator already exists: {0}")]
    OpExists(String),
    #[error("device already exists: {0}")]
    DeviceExists(String),
    #[error("attribute already exists: {0}")]
    AttrExists(String),
    #[error("model format already exists: {0}")]
    FormatExists(String),

    #[error("graph {0} has completed prerun")]
    PrerunDone(String),
    #[error("graph {0} has not completed prerun")]
    NotPrerun(String),
    #[error("graph {0} is running")]
    Running(String),

    #[error("buffer too small: {required} bytes required, {available} available")]
    BufferTooSmall { required: usize, available: usize },
    #[error("tensor {0} has no buffer")]
    NoBuffer(String),
    #[error("no device accepts graph {0}")]
    NoDevice(String),
    #[error("device {0} is disconnected")]
    Disconnected(String),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Index { .. }
            | Error::Name(_)
            | Error::EmptyNodeList
            | Error::Rank(_)
            | Error::Shape(_)
            | Error::Type(..)
            | Error::AttrType { .. }
            | Error::AttrSize { .. }
            | Error::Unconnected { .. }
            | Error::Cycle(_)
            | Error::Handle
            | Error::ContextMismatch
            | Error::MergeArity(_)
            | Error::Source(_)
            | Error::External { .. }
            | Error::Model(_)
            | Error::Kernel { .. }
            | Error::Config(_)
            | Error::Plugin(_) => ErrorKind::InvalidArgument,
            Error::Io(err) => match err.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                _ => ErrorKind::InvalidArgument,
            },
            Error::NodeNotFound(_)
            | Error::TensorNotFound(_)
            | Error::OpNotFound(_)
            | Error::DeviceNotFound(_)
            | Error::ModelNotFound(_)
            | Error::FormatNotFound(_)
            | Error::AttrNotFound(_) => ErrorKind::NotFound,
            Error::NodeExists(_)
            | Error::TensorExists(_)
            | Error::OpExists(_)
            | Error::DeviceExists(_)
            | Error::AttrExists(_)
            | Error::FormatExists(_) => ErrorKind::AlreadyExists,
            Error::PrerunDone(_) | Error::NotPrerun(_) | Error::Running(_) => {
                ErrorKind::PermissionDenied
            }
            Error::BufferTooSmall { .. } => ErrorKind::NoMemory,
            Error::NoBuffer(_) => ErrorKind::NoData,
            Error::NoDevice(_) | Error::Disconnected(_) => ErrorKind::NoDevice,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<safetensors::SafeTensorError> for Error {
    fn from(value: safetensors::SafeTensorError) -> Self {
        Self::Model(value.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

static LAST_ERROR: Mutex<Option<ErrorKind>> = Mutex::new(None);

/// Returns the kind of the most recent failure reported at the public boundary.
pub fn last_error() -> Option<ErrorKind> {
    *LAST_ERROR.lock().expect("failed to lock")
}

pub fn clear_last_error() {
    LAST_ERROR.lock().expect("failed to lock").take();
}

/// Records `err` as the process-wide last error.
pub(crate) fn record(err: &Error) {
    log::debug!("{err}");
    LAST_ERROR
        .lock()
        .expect("failed to lock")
        .replace(err.kind());
}

/// Records the error of a failed boundary call before handing it back.
pub(crate) trait Record {
    fn record(self) -> Self;
}

impl<T> Record for Result<T> {
    #[inline]
    fn record(self) -> Self {
        self.inspect_err(record)
    }
}
