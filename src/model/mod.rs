//! Model formats. A format is addressed as `"<format>"` for files or `"<format>:m"` for
//! in-memory buffers.

use std::{
    borrow::Cow,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use derive_more::Display;
use itertools::Itertools;
use rustc_hash::FxHashMap as HashMap;

use crate::{
    error::{Error, Result},
    ir::{DataLayout, Graph},
};

pub use safe::SafeTensorsFormat;

pub mod safe;

/// Where a model is read from.
#[derive(Debug, Clone)]
pub enum ModelSource {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

impl ModelSource {
    /// The name a model loaded from this source is known by: the path, or `mem`.
    pub fn name(&self) -> String {
        match self {
            ModelSource::File(path) => path.display().to_string(),
            ModelSource::Memory(_) => "mem".to_owned(),
        }
    }

    #[inline]
    pub fn is_memory(&self) -> bool {
        matches!(self, ModelSource::Memory(_))
    }

    pub fn read(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            ModelSource::File(path) => Ok(Cow::Owned(std::fs::read(path)?)),
            ModelSource::Memory(data) => Ok(Cow::Borrowed(&data[..])),
        }
    }
}

impl From<PathBuf> for ModelSource {
    fn from(value: PathBuf) -> Self {
        Self::File(value)
    }
}

impl From<&str> for ModelSource {
    fn from(value: &str) -> Self {
        Self::File(value.into())
    }
}

impl From<Vec<u8>> for ModelSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Memory(value.into())
    }
}

/// A parsed format string.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{name}{}", if *memory { ":m" } else { "" })]
pub struct ModelFormat {
    pub name: String,
    /// Whether the model is loaded from memory instead of a file.
    pub memory: bool,
}

impl ModelFormat {
    pub fn parse(format: &str) -> Result<Self> {
        let (name, memory) = match format.strip_suffix(":m") {
            Some(name) => (name, true),
            None => (format, false),
        };
        if name.is_empty() || name.contains(':') {
            return Err(Error::Name(format.to_owned()));
        }
        let name = name.to_owned();
        Ok(Self { name, memory })
    }

    /// Fails unless `source` is the kind of source this format string names.
    pub fn check(&self, source: &ModelSource) -> Result<()> {
        match self.memory == source.is_memory() {
            true => Ok(()),
            false => Err(Error::Source(self.to_string())),
        }
    }
}

/// Options recognised by the model loaders.
#[derive(Debug, Default, Clone)]
pub struct LoadOptions {
    /// Name the model is cached under in its context. File sources default to their path;
    /// memory sources without a name are never cached.
    pub name: Option<String>,
    /// Layout of the loaded graph. Defaults to the graph default.
    pub layout: Option<DataLayout>,
    /// Separate weights for formats that split structure and weights.
    pub weights: Option<ModelSource>,
}

pub trait ModelLoader: Send + Sync {
    fn format(&self) -> &str;
    fn load(&self, source: &ModelSource, options: &LoadOptions) -> Result<Graph>;
}

pub trait ModelSaver: Send + Sync {
    fn format(&self) -> &str;
    fn save(&self, graph: &Graph) -> Result<Vec<u8>>;
}

/// Loaders and savers by format name.
#[derive(Default)]
pub struct ModelRegistry {
    loaders: RwLock<HashMap<String, Arc<dyn ModelLoader>>>,
    savers: RwLock<HashMap<String, Arc<dyn ModelSaver>>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("loaders", &self.loaders())
            .field("savers", &self.savers())
            .finish()
    }
}

impl ModelRegistry {
    /// Returns a registry holding the built-in formats.
    pub fn builtin() -> Self {
        let registry = Self::default();
        let format = Arc::new(SafeTensorsFormat);
        registry
            .loaders
            .write()
            .expect("failed to lock")
            .insert(SafeTensorsFormat::NAME.to_owned(), format.clone());
        registry
            .savers
            .write()
            .expect("failed to lock")
            .insert(SafeTensorsFormat::NAME.to_owned(), format);
        registry
    }

    pub fn register_loader(&self, loader: Arc<dyn ModelLoader>) -> Result<()> {
        let mut loaders = self.loaders.write().expect("failed to lock");
        let name = loader.format().to_owned();
        if loaders.contains_key(&name) {
            return Err(Error::FormatExists(name));
        }
        loaders.insert(name, loader);
        Ok(())
    }

    pub fn register_saver(&self, saver: Arc<dyn ModelSaver>) -> Result<()> {
        let mut savers = self.savers.write().expect("failed to lock");
        let name = saver.format().to_owned();
        if savers.contains_key(&name) {
            return Err(Error::FormatExists(name));
        }
        savers.insert(name, saver);
        Ok(())
    }

    pub fn loader(&self, format: &str) -> Result<Arc<dyn ModelLoader>> {
        self.loaders
            .read()
            .expect("failed to lock")
            .get(format)
            .cloned()
            .ok_or_else(|| Error::FormatNotFound(format.to_owned()))
    }

    pub fn saver(&self, format: &str) -> Result<Arc<dyn ModelSaver>> {
        self.savers
            .read()
            .expect("failed to lock")
            .get(format)
            .cloned()
            .ok_or_else(|| Error::FormatNotFound(format.to_owned()))
    }

    pub fn loaders(&self) -> Vec<String> {
        let loaders = self.loaders.read().expect("failed to lock");
        loaders.keys().cloned().sorted().collect()
    }

    pub fn savers(&self) -> Vec<String> {
        let savers = self.savers.read().expect("failed to lock");
        savers.keys().cloned().sorted().collect()
    }
}
