//! Reactive Runtime
//!
//! The runtime connects cells, computations and observers. Each node of the
//! graph plays one or both of two roles:
//!
//! - a [`Source`] can be read and remembers who read it (cells, computations)
//! - a [`Reactive`] node can be invalidated (computations, observers)
//!
//! Edges pointing downstream are weak, so a dependent never keeps its
//! sources alive. Edges pointing upstream are strong: a computation owns
//! what it reads.
//!
//! The runtime also owns the per-thread engine configuration and the host
//! task queue used by the batched scheduler.
//!
//! # Thread Safety
//!
//! The whole engine is single-threaded. Nodes are `Rc`-based and the
//! runtime state is thread-local, so every thread that uses the engine gets
//! an independent graph, configuration and task queue.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::config::EngineConfig;
use crate::error::ReactiveError;
use crate::graph::{DirtyState, NodeId};
use crate::host::{MicrotaskQueue, TaskQueue};

/// A node that can be read and tracked.
pub(crate) trait Source {
    fn node_id(&self) -> NodeId;

    /// Bumped every time the node's value changes.
    fn version(&self) -> u64;

    /// Bring the node up to date. Cells are always up to date.
    fn refresh(&self) -> Result<(), ReactiveError>;

    fn add_dependent(&self, id: NodeId, dependent: Weak<dyn Reactive>);

    fn remove_dependent(&self, id: NodeId);
}

/// A node that can be notified when its dependencies change.
pub(crate) trait Reactive {
    /// Invalidate the node. `state` is the level of staleness: `Dirty` for
    /// direct dependents of a changed node, `MaybeDirty` for everything
    /// further downstream.
    fn mark(&self, state: DirtyState);
}

/// Ordered set of weak dependents, keyed by node id.
pub(crate) type Dependents = IndexMap<NodeId, Weak<dyn Reactive>>;

/// Drop dead entries and upgrade the rest, in insertion order.
pub(crate) fn live_dependents(dependents: &RefCell<Dependents>) -> Vec<Rc<dyn Reactive>> {
    let mut dependents = dependents.borrow_mut();
    dependents.retain(|_, dependent| dependent.strong_count() > 0);
    dependents.values().filter_map(Weak::upgrade).collect()
}

struct RuntimeState {
    config: EngineConfig,
    task_queue: Rc<dyn TaskQueue>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            task_queue: Rc::new(MicrotaskQueue),
        }
    }
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::default());
}

/// Handle to the current thread's reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Install `config` for the current thread.
    pub fn configure(config: EngineConfig) {
        tracing::debug!(?config, "engine configured");
        RUNTIME.with(|runtime| runtime.borrow_mut().config = config);
    }

    /// The configuration active on the current thread.
    pub fn config() -> EngineConfig {
        RUNTIME.with(|runtime| runtime.borrow().config.clone())
    }

    /// Install the queue the batched scheduler defers its flushes to.
    pub fn set_task_queue(queue: impl TaskQueue + 'static) {
        RUNTIME.with(|runtime| runtime.borrow_mut().task_queue = Rc::new(queue));
    }

    pub(crate) fn task_queue() -> Rc<dyn TaskQueue> {
        RUNTIME.with(|runtime| Rc::clone(&runtime.borrow().task_queue))
    }

    /// Restore the default configuration and task queue.
    pub fn reset() {
        RUNTIME.with(|runtime| *runtime.borrow_mut() = RuntimeState::default());
    }
}
