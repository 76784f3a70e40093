//! Rewrites applied to the optimized view of a graph at prerun.

use crate::{device::DeviceExecutor, error::Result, ir::Graph};

pub trait Pass: Send + Sync {
    fn name(&self) -> &str;

    /// Transforms `graph` in place. Returns `true` if anything changed.
    fn run(&self, graph: &mut Graph) -> Result<bool>;
}

/// Orders nodes so that producers run before their consumers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopoSort;

impl Pass for TopoSort {
    fn name(&self) -> &str {
        "topo_sort"
    }

    fn run(&self, graph: &mut Graph) -> Result<bool> {
        let order = graph.topo_order()?;
        let changed = order != graph.seq();
        graph.set_seq(order);
        Ok(changed)
    }
}

/// Builds the optimized view of `graph` for `device`.
pub fn optimize(graph: &Graph, device: &dyn DeviceExecutor) -> Result<Graph> {
    let passes: [&dyn Pass; 1] = [&TopoSort];

    let mut view = graph.clone();
    for pass in passes {
        let changed = pass.run(&mut view)?;
        log::debug!("{}: pass {} (changed: {changed})", graph.name(), pass.name());
    }
    device.optimize(&mut view)?;
    Ok(view)
}
