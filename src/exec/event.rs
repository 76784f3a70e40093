use std::sync::{Arc, Mutex};

use derive_more::Display;
use rustc_hash::FxHashMap as HashMap;

use super::ExecStatus;

/// Lifecycle events a hook can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum GraphEvent {
    Start,
    Suspend,
    Resume,
    Abort,
    Done,
}

/// What a hook is told when its event fires.
#[derive(Debug, Clone, Copy)]
pub struct EventInfo<'a> {
    pub graph: &'a str,
    pub event: GraphEvent,
    pub status: ExecStatus,
}

pub type EventHook = Arc<dyn Fn(&EventInfo<'_>) + Send + Sync>;

/// Status and hooks of an executor, shared with the device running it.
pub struct RunState {
    graph: String,
    status: Mutex<ExecStatus>,
    hooks: Mutex<HashMap<GraphEvent, EventHook>>,
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks: Vec<_> = self
            .hooks
            .lock()
            .expect("failed to lock")
            .keys()
            .copied()
            .collect();
        f.debug_struct("RunState")
            .field("graph", &self.graph)
            .field("status", &self.status())
            .field("hooks", &hooks)
            .finish()
    }
}

impl RunState {
    pub fn new(graph: impl Into<String>) -> Self {
        Self {
            graph: graph.into(),
            status: Mutex::new(ExecStatus::Created),
            hooks: Default::default(),
        }
    }

    /// Name of the graph the state belongs to.
    #[inline]
    pub fn graph(&self) -> &str {
        &self.graph
    }

    #[inline]
    pub fn status(&self) -> ExecStatus {
        *self.status.lock().expect("failed to lock")
    }

    #[inline]
    pub(crate) fn set_status(&self, status: ExecStatus) {
        *self.status.lock().expect("failed to lock") = status;
    }

    /// Registers `hook` for `event`, returning the hook it replaces.
    pub(crate) fn set_hook(&self, event: GraphEvent, hook: EventHook) -> Option<EventHook> {
        self.hooks
            .lock()
            .expect("failed to lock")
            .insert(event, hook)
    }

    /// Calls the hook registered for `event`, if any.
    pub fn fire(&self, event: GraphEvent) {
        let hook = self
            .hooks
            .lock()
            .expect("failed to lock")
            .get(&event)
            .cloned();
        log::trace!("{}: {event}", self.graph);
        if let Some(hook) = hook {
            let info = EventInfo {
                graph: &self.graph,
                event,
                status: self.status(),
            };
            hook(&info);
        }
    }
}
