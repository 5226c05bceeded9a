//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Cells Work
//!
//! 1. When a cell is read within a reactive context (a computation being
//!    evaluated), the cell registers that computation as a dependent.
//!
//! 2. When the cell's value changes, all dependents are marked dirty.
//!
//! 3. Observers downstream of those dependents are handed to the scheduler.
//!
//! # Equality
//!
//! Writing a value equal to the current one is a no-op: the version stays
//! the same and nobody is notified. This keeps notification counts tied to
//! actual changes.
//!
//! # Memory Layout
//!
//! Each cell consists of:
//! - A unique ID (8 bytes)
//! - The value
//! - A version counter
//! - An ordered map of weak dependents (grows with number of dependents)

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use super::context::ReactiveContext;
use super::runtime::{live_dependents, Dependents, Reactive, Source};
use super::transaction;
use crate::error::ReactiveError;
use crate::graph::{DirtyState, NodeId};

struct CellInner<T> {
    id: NodeId,
    value: RefCell<T>,
    version: std::cell::Cell<u64>,
    dependents: RefCell<Dependents>,
}

impl<T> Source for CellInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.get()
    }

    fn refresh(&self) -> Result<(), ReactiveError> {
        Ok(())
    }

    fn add_dependent(&self, id: NodeId, dependent: Weak<dyn Reactive>) {
        self.dependents.borrow_mut().insert(id, dependent);
    }

    fn remove_dependent(&self, id: NodeId) {
        self.dependents.borrow_mut().shift_remove(&id);
    }
}

/// A tracked mutable value.
///
/// Cloning a cell is cheap and yields a handle to the same storage.
///
/// # Example
///
/// ```rust
/// use ripple_core::Cell;
///
/// let count = Cell::new(0);
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Cell<T> {
    inner: Rc<CellInner<T>>,
}

impl<T> Cell<T>
where
    T: PartialEq + 'static,
{
    /// Create a new cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(CellInner {
                id: NodeId::new(),
                value: RefCell::new(value),
                version: std::cell::Cell::new(0),
                dependents: RefCell::new(Dependents::new()),
            }),
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Number of effective writes so far.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Get the current value.
    ///
    /// If called while a computation evaluates, that computation starts
    /// depending on this cell.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to this cell, since the value is borrowed while
    /// `f` runs. Use [`Cell::get`] to work on a copy instead.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Set a new value and invalidate dependents.
    ///
    /// Does nothing if `value` equals the current value. Otherwise every
    /// dependent computation is marked dirty, direct observers run before
    /// this returns, and atomic observers run at the end of the enclosing
    /// transaction (or of this write, if there is none).
    pub fn set(&self, value: T) {
        self.replace_inner(value);
    }

    /// Set a new value and return the previous one.
    ///
    /// Returns `value` itself if it equals the current value, which is
    /// left untouched.
    pub fn replace(&self, value: T) -> T {
        self.replace_inner(value)
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let value = f(&self.inner.value.borrow());
        self.set(value);
    }

    /// Get the number of live dependents.
    pub fn dependent_count(&self) -> usize {
        self.inner
            .dependents
            .borrow()
            .values()
            .filter(|dependent| dependent.strong_count() > 0)
            .count()
    }

    fn track(&self) {
        if ReactiveContext::is_tracking() {
            ReactiveContext::track(self.inner.clone());
        }
    }

    fn replace_inner(&self, value: T) -> T {
        let previous = {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                tracing::trace!(cell = %self.inner.id, "write skipped, value unchanged");
                return value;
            }
            std::mem::replace(&mut *current, value)
        };
        self.inner.version.set(self.inner.version.get() + 1);
        self.notify_dependents();
        previous
    }

    /// Mark every dependent dirty and deliver the resulting notifications.
    fn notify_dependents(&self) {
        transaction::propagate(|| {
            let dependents = live_dependents(&self.inner.dependents);
            tracing::trace!(
                cell = %self.inner.id,
                version = self.inner.version.get(),
                dependents = dependents.len(),
                "cell changed"
            );
            for dependent in dependents {
                dependent.mark(DirtyState::Dirty);
            }
        });
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .field("dependent_count", &self.inner.dependents.borrow().len())
            .finish()
    }
}

impl<T> Default for Cell<T>
where
    T: Default + PartialEq + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
