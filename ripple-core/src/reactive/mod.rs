//! Reactive Primitives
//!
//! This module implements the core reactive system: cells, computations and
//! observers, plus the transactions that group writes together.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state. When a cell's value is read
//! while a computation evaluates, the cell automatically registers that
//! computation as a dependent. When the cell's value changes, all dependents
//! are invalidated.
//!
//! ## Computations
//!
//! A Computation is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies changed, and only when something reads
//! it. Reading a computation from another computation makes it a dependency
//! like any cell.
//!
//! ## Observers
//!
//! An Observer watches a computation and calls back with the new value after
//! it changes. When the callback runs is decided by the observer's scheduler:
//! right after each write (direct), once the outermost transaction ends
//! (atomic), or on the next host task turn (batched).
//!
//! ## Transactions
//!
//! Every write runs in an implicit transaction. Explicit transactions nest,
//! and atomic observers wait for the outermost one to end.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a cell is read, we check if there is an active
//! tracking context and, if so, register the dependency.
//!
//! Invalidation is push-based and evaluation is pull-based: a write marks
//! everything downstream stale, and values are recomputed when read.

mod cell;
mod computation;
mod context;
mod observer;
mod runtime;
pub mod transaction;

pub use cell::Cell;
pub use computation::Computation;
pub use context::{untracked, ReactiveContext};
pub use observer::{autorun, observe, Disposer, ObserveOptions};
pub use runtime::Runtime;
pub use transaction::{transaction, try_transaction, Transaction};
