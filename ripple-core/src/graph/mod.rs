//! Dependency Graph
//!
//! Node identity, dirty states and the update scheduler.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph where:
//!
//! - Nodes are cells, computations and observers
//! - Edges are dependencies: if A reads B, there is an edge from B to A
//!
//! The graph is not stored centrally. Each node keeps its own edge lists
//! (see [`crate::reactive`]); this module holds what the nodes share: ids,
//! dirty states, and the scheduler that decides when observers at the
//! leaves of the graph re-evaluate.

mod node;
mod scheduler;

pub use node::{DirtyState, NodeId};
pub use scheduler::{SchedulerKind, UpdateScheduler};
pub(crate) use scheduler::Notify;
