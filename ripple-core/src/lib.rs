//! Ripple Core
//!
//! This crate provides a fine-grained reactive state engine. It implements:
//!
//! - Mutable cells and cached computations with automatic dependency tracking
//! - Glitch-free change propagation through the dependency graph
//! - Observers with direct, batched and atomic update scheduling
//! - Nested transactions
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `graph`: Node identity, dirty states and the update scheduler
//! - `host`: Task queues the batched scheduler defers to
//! - `config`: Per-thread engine configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{transaction, Cell, Computation, ObserveOptions};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let price = Cell::new(10);
//! let quantity = Cell::new(2);
//!
//! let total = {
//!     let (price, quantity) = (price.clone(), quantity.clone());
//!     Computation::new(move || price.get() * quantity.get())
//! };
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let log = seen.clone();
//! let _disposer = total.observe(ObserveOptions::atomic(), move |total| {
//!     log.borrow_mut().push(*total);
//! });
//!
//! transaction(|| {
//!     price.set(20);
//!     quantity.set(3);
//! });
//!
//! // One notification for the whole transaction.
//! assert_eq!(*seen.borrow(), vec![60]);
//! assert_eq!(total.get().unwrap(), 60);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod host;
pub mod reactive;

pub use config::EngineConfig;
pub use error::{ConfigError, ReactiveError};
pub use graph::{DirtyState, NodeId, SchedulerKind};
pub use host::{run_microtasks, MicrotaskQueue, TaskQueue, TokioTaskQueue};
pub use reactive::{
    autorun, observe, transaction, try_transaction, untracked, Cell, Computation, Disposer,
    ObserveOptions, Runtime, Transaction,
};
