use std::sync::{Arc, RwLock};

use derive_more::Display;
use itertools::Itertools;
use rustc_hash::FxHashMap as HashMap;

use crate::{
    error::{Error, Result},
    ir::Graph,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub struct ContextId(uid::Id<ContextId>);

/// A loaded model and the number of graphs created from it.
#[derive(Debug)]
struct Model {
    graph: Arc<Graph>,
    users: usize,
}

#[derive(Debug)]
struct ContextInner {
    id: ContextId,
    name: String,
    empty: bool,
    /// Loaded models by model name.
    models: RwLock<HashMap<String, Model>>,
}

/// A scope grouping graphs and the models loaded for them.
///
/// Cloning yields another handle to the same context.
#[derive(Debug, Clone)]
pub struct Context(Arc<ContextInner>);

impl Context {
    /// Creates a context. An `empty` context has no model store: models loaded into it are
    /// never cached.
    pub fn new(name: impl Into<String>, empty: bool) -> Self {
        let inner = ContextInner {
            id: ContextId(uid::Id::new()),
            name: name.into(),
            empty,
            models: Default::default(),
        };
        log::debug!("context created: {} ({})", inner.name, inner.id);
        Self(Arc::new(inner))
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.0.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.empty
    }

    /// Returns `true` if both handles refer to the same context.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn model(&self, name: &str) -> Result<Arc<Graph>> {
        self.0
            .models
            .read()
            .expect("failed to lock")
            .get(name)
            .map(|model| model.graph.clone())
            .ok_or_else(|| Error::ModelNotFound(name.to_owned()))
    }

    /// Names of the loaded models, sorted.
    pub fn models(&self) -> Vec<String> {
        self.0
            .models
            .read()
            .expect("failed to lock")
            .keys()
            .cloned()
            .sorted()
            .collect()
    }

    /// Returns the model called `name`, running `load` and caching its result if it is not
    /// loaded yet. Every successful call must be paired with a [`release_model`].
    ///
    /// [`release_model`]: Self::release_model
    pub(crate) fn load_model(
        &self,
        name: &str,
        load: impl FnOnce() -> Result<Graph>,
    ) -> Result<Arc<Graph>> {
        if self.0.empty {
            return load().map(Arc::new);
        }
        if let Some(model) = self
            .0
            .models
            .write()
            .expect("failed to lock")
            .get_mut(name)
        {
            model.users += 1;
            log::debug!("model reused: {name} ({} users)", model.users);
            return Ok(model.graph.clone());
        }

        let graph = Arc::new(load()?);
        let mut models = self.0.models.write().expect("failed to lock");
        let model = models.entry(name.to_owned()).or_insert_with(|| Model { graph, users: 0 });
        model.users += 1;
        log::info!("model loaded: {name}");
        Ok(model.graph.clone())
    }

    /// Drops one user of the model called `name`, removing the model once nobody uses it.
    /// Returns `true` if the model was removed.
    pub(crate) fn release_model(&self, name: &str) -> bool {
        let mut models = self.0.models.write().expect("failed to lock");
        let Some(model) = models.get_mut(name) else {
            return false;
        };
        model.users = model.users.saturating_sub(1);
        if model.users > 0 {
            return false;
        }
        models.remove(name);
        log::debug!("model released: {name}");
        true
    }

    /// Releases every model loaded into the context.
    ///
    /// Graphs created in the context keep their own handle and stay usable.
    pub fn destroy(self) {
        let models = std::mem::take(&mut *self.0.models.write().expect("failed to lock"));
        log::debug!(
            "context destroyed: {} ({}), {} models released",
            self.0.name,
            self.0.id,
            models.len()
        );
    }
}
