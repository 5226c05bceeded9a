//! Computation Implementation
//!
//! A Computation is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computations Work
//!
//! 1. On first access, the computation runs its derivation inside a
//!    reactive context and caches the result. Every cell or computation
//!    read during the run becomes a dependency.
//!
//! 2. When accessed again, if nothing upstream changed, the cached value is
//!    returned without running the derivation.
//!
//! 3. When a direct dependency changes, the computation is marked `Dirty`.
//!    Its own dependents are marked `MaybeDirty`, and so on down the graph.
//!    Each node forwards an invalidation at most once until it is read
//!    again, so diamonds are walked once.
//!
//! 4. On next access, a `Dirty` computation reruns. A `MaybeDirty` one first
//!    brings its dependencies up to date and compares their versions with
//!    the ones it saw; it reruns only if one of them moved.
//!
//! 5. A rerun whose result equals the cached value does not bump the
//!    version, so nothing downstream reruns because of it.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A cell changes
//! - 10 computations depend on it
//! - Only the computations actually read (or observed) recompute
//! - Computations that are never read stay dirty (no wasted work)
//!
//! # Failures
//!
//! A derivation may fail. The cached value is then left at its last good
//! state, the computation stays dirty so the next read retries, and the
//! error is returned to the reader.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::context::{Dependencies, ReactiveContext};
use super::observer::{self, Disposer, ObserveOptions};
use super::runtime::{live_dependents, Dependents, Reactive, Source};
use super::transaction;
use crate::error::{BoxError, ReactiveError};
use crate::graph::{DirtyState, NodeId};

type Derivation<T> = Box<dyn Fn() -> Result<T, BoxError>>;

pub(crate) struct ComputationInner<T> {
    id: NodeId,
    this: Weak<ComputationInner<T>>,

    /// The derivation function.
    compute: Derivation<T>,

    /// The cached value (None if never computed successfully).
    value: RefCell<Option<T>>,

    state: StdCell<DirtyState>,

    /// Bumped whenever a run produces a value different from the cache.
    version: StdCell<u64>,

    /// Whether dependents were told about the current invalidation.
    notified: StdCell<bool>,

    /// Set while the derivation runs, to detect cycles.
    evaluating: StdCell<bool>,

    /// Sources read during the last run, with the versions seen.
    dependencies: RefCell<Dependencies>,

    /// Computations and observers that read this computation.
    dependents: RefCell<Dependents>,
}

/// Clears the evaluating flag when the derivation returns or unwinds.
///
/// A derivation that unwinds leaves the computation dirty.
struct Evaluation<'a, T> {
    inner: &'a ComputationInner<T>,
    finished: bool,
}

impl<T> Drop for Evaluation<'_, T> {
    fn drop(&mut self) {
        self.inner.evaluating.set(false);
        if !self.finished {
            self.inner.state.set(DirtyState::Dirty);
            self.inner.notified.set(false);
        }
    }
}

impl<T> ComputationInner<T>
where
    T: PartialEq + 'static,
{
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn current_version(&self) -> u64 {
        self.version.get()
    }

    /// Clone the cached value. Only valid after a successful refresh.
    pub(crate) fn cached(&self) -> T
    where
        T: Clone,
    {
        self.value
            .borrow()
            .clone()
            .expect("refreshed computation should have a value")
    }

    /// Whether any dependency moved past the version seen on the last run.
    ///
    /// Brings computation dependencies up to date first. A dependency that
    /// fails to refresh counts as changed, so the derivation gets to decide
    /// what to do with the error.
    fn dependencies_changed(&self) -> bool {
        let dependencies: SmallVec<[(Rc<dyn Source>, u64); 4]> = self
            .dependencies
            .borrow()
            .values()
            .map(|dep| (Rc::clone(&dep.source), dep.version))
            .collect();

        dependencies
            .into_iter()
            .any(|(source, seen)| source.refresh().is_err() || source.version() != seen)
    }

    /// Run the derivation and record its dependencies.
    fn recompute(&self) -> Result<(), ReactiveError> {
        tracing::trace!(computation = %self.id, "recomputing");

        // Invalidations that arrive while the derivation runs must survive
        // it, so the state is reset before running rather than after.
        self.state.set(DirtyState::Clean);
        self.notified.set(false);
        self.evaluating.set(true);

        let (result, dependencies) = {
            let mut evaluation = Evaluation {
                inner: self,
                finished: false,
            };
            let context = ReactiveContext::enter(self.id, self.this.clone() as Weak<dyn Reactive>);
            let result = (self.compute)();
            let dependencies = context.take_dependencies();
            evaluation.finished = true;
            (result, dependencies)
        };
        self.replace_dependencies(dependencies);

        match result {
            Ok(value) => {
                let changed = self.value.borrow().as_ref() != Some(&value);
                if changed {
                    *self.value.borrow_mut() = Some(value);
                    self.version.set(self.version.get() + 1);
                }
                tracing::debug!(
                    computation = %self.id,
                    version = self.version.get(),
                    changed,
                    "recomputed"
                );
                Ok(())
            }
            Err(source) => {
                self.state.set(DirtyState::Dirty);
                self.notified.set(false);
                tracing::debug!(computation = %self.id, error = %source, "derivation failed");
                Err(ReactiveError::Evaluation {
                    node: self.id,
                    source: source.into(),
                })
            }
        }
    }

    /// Swap in the dependencies of the latest run, unsubscribing from
    /// sources that were not read this time.
    fn replace_dependencies(&self, dependencies: Dependencies) {
        let previous = std::mem::replace(&mut *self.dependencies.borrow_mut(), dependencies);
        let dropped: Vec<Rc<dyn Source>> = {
            let current = self.dependencies.borrow();
            previous
                .into_iter()
                .filter(|(id, _)| !current.contains_key(id))
                .map(|(_, dep)| dep.source)
                .collect()
        };

        for source in dropped {
            source.remove_dependent(self.id);
        }
    }

    /// Stop listening upstream. The next read recomputes from scratch.
    fn release(&self) {
        let dependencies = std::mem::take(&mut *self.dependencies.borrow_mut());
        if dependencies.is_empty() {
            return;
        }
        tracing::debug!(computation = %self.id, dependencies = dependencies.len(), "released");

        self.state.set(DirtyState::Dirty);
        self.notified.set(false);
        for dep in dependencies.into_values() {
            dep.source.remove_dependent(self.id);
        }
    }
}

impl<T> Source for ComputationInner<T>
where
    T: PartialEq + 'static,
{
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.get()
    }

    fn refresh(&self) -> Result<(), ReactiveError> {
        if self.evaluating.get() {
            tracing::warn!(computation = %self.id, "cycle detected");
            return Err(ReactiveError::Cycle { node: self.id });
        }

        match self.state.get() {
            DirtyState::Clean => Ok(()),
            DirtyState::MaybeDirty => {
                if self.dependencies_changed() {
                    return self.recompute();
                }
                // Checking may have run other derivations that wrote to our
                // direct dependencies.
                match self.state.get() {
                    DirtyState::Dirty => self.recompute(),
                    _ => {
                        self.state.set(DirtyState::Clean);
                        self.notified.set(false);
                        Ok(())
                    }
                }
            }
            DirtyState::Dirty => self.recompute(),
        }
    }

    fn add_dependent(&self, id: NodeId, dependent: Weak<dyn Reactive>) {
        self.dependents.borrow_mut().insert(id, dependent);
    }

    fn remove_dependent(&self, id: NodeId) {
        let now_unobserved = {
            let mut dependents = self.dependents.borrow_mut();
            dependents.shift_remove(&id).is_some() && dependents.is_empty()
        };
        if now_unobserved {
            self.release();
        }
    }
}

impl<T> Reactive for ComputationInner<T>
where
    T: PartialEq + 'static,
{
    fn mark(&self, state: DirtyState) {
        if state > self.state.get() {
            self.state.set(state);
        }
        if self.notified.replace(true) {
            return;
        }

        tracing::trace!(computation = %self.id, ?state, "invalidated");
        for dependent in live_dependents(&self.dependents) {
            dependent.mark(DirtyState::MaybeDirty);
        }
    }
}

impl<T> Drop for ComputationInner<T> {
    fn drop(&mut self) {
        for (_, dep) in self.dependencies.get_mut().drain(..) {
            dep.source.remove_dependent(self.id);
        }
    }
}

/// A cached value derived from cells and other computations.
///
/// Cloning a computation is cheap and yields a handle to the same node.
///
/// # Example
///
/// ```rust
/// use ripple_core::{Cell, Computation};
///
/// let count = Cell::new(2);
/// let doubled = Computation::new({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5);
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
pub struct Computation<T> {
    inner: Rc<ComputationInner<T>>,
}

impl<T> Computation<T>
where
    T: PartialEq + 'static,
{
    /// Create a computation from an infallible derivation.
    ///
    /// The derivation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::from_derivation(Box::new(move || Ok(compute())))
    }

    /// Create a computation from a fallible derivation.
    pub fn try_new<F, E>(compute: F) -> Self
    where
        F: Fn() -> Result<T, E> + 'static,
        E: Into<BoxError>,
    {
        Self::from_derivation(Box::new(move || compute().map_err(Into::into)))
    }

    fn from_derivation(compute: Derivation<T>) -> Self {
        let inner = Rc::new_cyclic(|this| ComputationInner {
            id: NodeId::new(),
            this: this.clone(),
            compute,
            value: RefCell::new(None),
            state: StdCell::new(DirtyState::Dirty),
            version: StdCell::new(0),
            notified: StdCell::new(false),
            evaluating: StdCell::new(false),
            dependencies: RefCell::new(Dependencies::new()),
            dependents: RefCell::new(Dependents::new()),
        });
        Self { inner }
    }

    /// Get the computation's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside another computation's evaluation, the read is tracked even if
    /// it fails, so the reader is invalidated when this computation's inputs
    /// change.
    pub fn get(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        let refreshed = self.inner.refresh();
        if ReactiveContext::is_tracking() {
            ReactiveContext::track(self.inner.clone());
        }
        refreshed?;
        Ok(self.inner.cached())
    }

    /// Mark the computation as needing recomputation.
    ///
    /// Observers downstream are notified the same way a cell write would
    /// notify them.
    pub fn mark_dirty(&self) {
        transaction::propagate(|| self.inner.mark(DirtyState::Dirty));
    }

    /// Get the current dirty state.
    pub fn state(&self) -> DirtyState {
        self.inner.state.get()
    }

    /// Number of runs that changed the cached value.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Check if the computation has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Get the number of dependencies recorded by the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.borrow().len()
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

    /// Register `callback` to receive new values of this computation.
    ///
    /// The computation is evaluated once right away to establish its
    /// dependencies. Afterwards the callback runs whenever the value
    /// changes, at the time chosen by `options.scheduler`. The returned
    /// [`Disposer`] unregisters the observer when disposed or dropped.
    pub fn observe<F>(&self, options: ObserveOptions, callback: F) -> Disposer
    where
        T: Clone,
        F: FnMut(&T) + 'static,
    {
        observer::register(Rc::clone(&self.inner), options, Box::new(callback))
    }
}

impl<T> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.get())
            .field("version", &self.inner.version.get())
            .field("has_value", &self.inner.value.borrow().is_some())
            .field("dependent_count", &self.inner.dependents.borrow().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
