//! Observer Implementation
//!
//! An Observer is a leaf of the dependency graph: it depends on exactly one
//! computation, has no dependents, and exists only to run a side effect when
//! that computation's value changes.
//!
//! # How Observers Work
//!
//! 1. When registered, the observer evaluates its computation once, right
//!    away, so the computation's dependencies are in place.
//!
//! 2. When the computation is invalidated, the observer hands itself to the
//!    scheduler under the policy it was registered with.
//!
//! 3. When the scheduler runs it, the observer brings the computation up to
//!    date and calls its callback if the value changed since the last
//!    delivery.
//!
//! # Disposal
//!
//! Registration returns a [`Disposer`]. Disposing it (or dropping it)
//! detaches the observer. When the last dependent of a computation detaches,
//! the computation stops listening upstream until it is read again.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::computation::{Computation, ComputationInner};
use super::runtime::{Reactive, Runtime, Source};
use crate::graph::{self, DirtyState, NodeId, Notify, SchedulerKind};

type Callback<T> = Box<dyn FnMut(&T)>;

/// How an observer is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOptions {
    /// When the observer re-evaluates after an invalidation.
    pub scheduler: SchedulerKind,

    /// Deliver the initial value to the callback during registration.
    pub fire_immediately: bool,
}

impl ObserveOptions {
    /// Options with the given scheduler.
    pub fn new(scheduler: SchedulerKind) -> Self {
        Self {
            scheduler,
            fire_immediately: false,
        }
    }

    pub fn direct() -> Self {
        Self::new(SchedulerKind::Direct)
    }

    pub fn batched() -> Self {
        Self::new(SchedulerKind::Batched)
    }

    pub fn atomic() -> Self {
        Self::new(SchedulerKind::Atomic)
    }

    /// Whether to call the callback with the initial value.
    pub fn fire_immediately(mut self, fire: bool) -> Self {
        self.fire_immediately = fire;
        self
    }
}

impl Default for ObserveOptions {
    /// Uses the scheduler configured for the current thread.
    fn default() -> Self {
        Self::new(Runtime::config().default_scheduler)
    }
}

struct ObserverInner<T> {
    id: NodeId,
    this: Weak<ObserverInner<T>>,
    scheduler: SchedulerKind,
    computation: Rc<ComputationInner<T>>,

    /// Version of the computation last delivered to the callback.
    seen: StdCell<u64>,

    callback: RefCell<Callback<T>>,
    disposed: StdCell<bool>,
}

impl<T> ObserverInner<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Bring the computation up to date and deliver its value if it moved.
    fn run(&self) {
        if let Err(err) = self.computation.refresh() {
            tracing::warn!(observer = %self.id, error = %err, "observed computation failed");
            return;
        }

        let version = self.computation.current_version();
        if self.seen.replace(version) == version {
            return;
        }
        self.deliver();
    }

    fn deliver(&self) {
        let value = self.computation.cached();
        match self.callback.try_borrow_mut() {
            Ok(mut callback) => callback(&value),
            Err(_) => tracing::warn!(observer = %self.id, "observer callback re-entered; skipped"),
        }
    }
}

impl<T> Reactive for ObserverInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn mark(&self, _state: DirtyState) {
        if self.disposed.get() {
            return;
        }
        graph::UpdateScheduler::enqueue(self.scheduler, self.id, self.this.clone() as Weak<dyn Notify>);
    }
}

impl<T> Notify for ObserverInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn is_live(&self) -> bool {
        !self.disposed.get()
    }

    fn notify(&self) {
        self.run();
    }

    /// Bring the computation up to date without calling back, so the
    /// computations between it and the cells are listening again. The
    /// skipped value is delivered with the next change.
    fn abandon(&self) {
        tracing::warn!(observer = %self.id, "notification dropped by flush limit");
        if let Err(err) = self.computation.refresh() {
            tracing::warn!(observer = %self.id, error = %err, "observed computation failed");
        }
    }
}

/// Type-erased view of an observer, held by its [`Disposer`].
trait Detach {
    fn node_id(&self) -> NodeId;

    /// Returns `false` if the observer was already detached.
    fn detach(&self) -> bool;

    fn is_detached(&self) -> bool;
}

impl<T> Detach for ObserverInner<T>
where
    T: PartialEq + 'static,
{
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn detach(&self) -> bool {
        if self.disposed.replace(true) {
            return false;
        }
        self.computation.remove_dependent(self.id);
        true
    }

    fn is_detached(&self) -> bool {
        self.disposed.get()
    }
}

/// Owns an observer. Disposing or dropping it detaches the observer.
#[must_use = "the observer is disposed as soon as the disposer is dropped"]
pub struct Disposer {
    observer: Rc<dyn Detach>,
}

impl Disposer {
    /// The observer's node ID.
    pub fn id(&self) -> NodeId {
        self.observer.node_id()
    }

    /// Detach the observer.
    ///
    /// Pending notifications for it are dropped. Disposing more than once
    /// is a no-op.
    pub fn dispose(&self) {
        if self.observer.detach() {
            tracing::debug!(observer = %self.observer.node_id(), "observer disposed");
        }
    }

    /// Whether the observer has been detached.
    pub fn is_disposed(&self) -> bool {
        self.observer.is_detached()
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("id", &self.id())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Attach a new observer to `computation`.
pub(crate) fn register<T>(
    computation: Rc<ComputationInner<T>>,
    options: ObserveOptions,
    callback: Callback<T>,
) -> Disposer
where
    T: Clone + PartialEq + 'static,
{
    let observer = Rc::new_cyclic(|this| ObserverInner {
        id: NodeId::new(),
        this: this.clone(),
        scheduler: options.scheduler,
        computation,
        seen: StdCell::new(0),
        callback: RefCell::new(callback),
        disposed: StdCell::new(false),
    });
    tracing::debug!(
        observer = %observer.id,
        computation = %observer.computation.id(),
        scheduler = %options.scheduler,
        "observer registered"
    );

    observer
        .computation
        .add_dependent(observer.id, Rc::downgrade(&observer) as Weak<dyn Reactive>);

    // The first evaluation is synchronous for every scheduler.
    match observer.computation.refresh() {
        Ok(()) => {
            observer.seen.set(observer.computation.current_version());
            if options.fire_immediately {
                observer.deliver();
            }
        }
        Err(err) => {
            tracing::warn!(observer = %observer.id, error = %err, "initial evaluation failed");
        }
    }

    Disposer { observer }
}

/// Observe `computation` with `callback`.
///
/// Shorthand for [`Computation::observe`].
pub fn observe<T, F>(computation: &Computation<T>, options: ObserveOptions, callback: F) -> Disposer
where
    T: Clone + PartialEq + 'static,
    F: FnMut(&T) + 'static,
{
    computation.observe(options, callback)
}

/// Run `body` now and again whenever anything it read changes.
///
/// The reruns follow `options.scheduler`. The body stops running once the
/// returned [`Disposer`] is disposed or dropped.
pub fn autorun<F>(options: ObserveOptions, body: F) -> Disposer
where
    F: FnMut() + 'static,
{
    let body = RefCell::new(body);
    let computation = Computation::new(move || (&mut *body.borrow_mut())());
    computation.observe(options, |_: &()| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::run_microtasks;
    use crate::reactive::{transaction, Cell};

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl FnMut(&T) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        (log, move |value: &T| sink.borrow_mut().push(value.clone()))
    }

    fn doubled(cell: &Cell<i32>) -> Computation<i32> {
        let cell = cell.clone();
        Computation::new(move || cell.get() * 2)
    }

    #[test]
    fn direct_observer_fires_per_write() {
        let cell = Cell::new(1);
        let computation = doubled(&cell);
        let (log, callback) = recorder();

        let _disposer = computation.observe(ObserveOptions::direct(), callback);
        assert!(log.borrow().is_empty());

        cell.set(2);
        cell.set(3);
        assert_eq!(*log.borrow(), vec![4, 6]);
    }

    #[test]
    fn fire_immediately_delivers_initial_value() {
        let cell = Cell::new(5);
        let computation = doubled(&cell);
        let (log, callback) = recorder();

        let _disposer = computation.observe(ObserveOptions::direct().fire_immediately(true), callback);
        assert_eq!(*log.borrow(), vec![10]);
    }

    #[test]
    fn unchanged_values_are_not_delivered() {
        let cell = Cell::new(1);
        let parity = Computation::new({
            let cell = cell.clone();
            move || cell.get() % 2
        });
        let (log, callback) = recorder();

        let _disposer = parity.observe(ObserveOptions::direct(), callback);
        cell.set(3);
        cell.set(4);
        assert_eq!(*log.borrow(), vec![0]);
    }

    #[test]
    fn batched_observer_coalesces_a_turn() {
        let cell = Cell::new(0);
        let computation = doubled(&cell);
        let (log, callback) = recorder();

        let _disposer = computation.observe(ObserveOptions::batched(), callback);
        for i in 1..=5 {
            cell.set(i);
        }
        assert!(log.borrow().is_empty());

        run_microtasks();
        assert_eq!(*log.borrow(), vec![10]);
    }

    #[test]
    fn atomic_observer_fires_once_per_transaction() {
        let cell = Cell::new(0);
        let computation = doubled(&cell);
        let (log, callback) = recorder();

        let _disposer = computation.observe(ObserveOptions::atomic(), callback);
        transaction(|| {
            cell.set(1);
            transaction(|| cell.set(2));
            assert!(log.borrow().is_empty());
            cell.set(3);
        });
        assert_eq!(*log.borrow(), vec![6]);

        // Outside a transaction every write stands alone.
        cell.set(4);
        assert_eq!(*log.borrow(), vec![6, 8]);
    }

    #[test]
    fn direct_observer_ignores_transactions() {
        let cell = Cell::new(0);
        let computation = doubled(&cell);
        let (log, callback) = recorder();

        let _disposer = computation.observe(ObserveOptions::direct(), callback);
        transaction(|| {
            cell.set(1);
            assert_eq!(*log.borrow(), vec![2]);
            cell.set(2);
        });
        assert_eq!(*log.borrow(), vec![2, 4]);
    }

    #[test]
    fn disposed_observer_is_not_called() {
        let cell = Cell::new(0);
        let computation = doubled(&cell);
        let (log, callback) = recorder();

        let disposer = computation.observe(ObserveOptions::direct(), callback);
        cell.set(1);
        disposer.dispose();
        assert!(disposer.is_disposed());
        cell.set(2);
        assert_eq!(*log.borrow(), vec![2]);

        disposer.dispose();
        assert!(disposer.is_disposed());
    }

    #[test]
    fn disposal_before_batched_flush_cancels_delivery() {
        let cell = Cell::new(0);
        let computation = doubled(&cell);
        let (log, callback) = recorder();

        let disposer = computation.observe(ObserveOptions::batched(), callback);
        cell.set(1);
        drop(disposer);

        run_microtasks();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn last_disposal_releases_dependencies() {
        let cell = Cell::new(0);
        let computation = doubled(&cell);

        let first = computation.observe(ObserveOptions::direct(), |_| {});
        let second = computation.observe(ObserveOptions::direct(), |_| {});
        assert_eq!(computation.dependent_count(), 2);
        assert_eq!(cell.dependent_count(), 1);

        first.dispose();
        assert_eq!(cell.dependent_count(), 1);

        second.dispose();
        assert_eq!(computation.dependent_count(), 0);
        assert_eq!(cell.dependent_count(), 0);
        assert_eq!(computation.state(), DirtyState::Dirty);

        // Reading again resubscribes.
        cell.set(4);
        assert_eq!(computation.get().unwrap(), 8);
        assert_eq!(cell.dependent_count(), 1);
    }

    #[test]
    fn autorun_reruns_body() {
        let cell = Cell::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let disposer = autorun(ObserveOptions::direct(), {
            let cell = cell.clone();
            let seen = seen.clone();
            move || seen.borrow_mut().push(cell.get())
        });
        assert_eq!(*seen.borrow(), vec![1]);

        cell.set(2);
        assert_eq!(*seen.borrow(), vec![1, 2]);

        drop(disposer);
        cell.set(3);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn failing_computation_recovers_under_observation() {
        let cell = Cell::new(1);
        let checked = Computation::try_new({
            let cell = cell.clone();
            move || {
                let value = cell.get();
                if value == 0 {
                    Err("division by zero")
                } else {
                    Ok(100 / value)
                }
            }
        });
        let (log, callback) = recorder();

        let _disposer = checked.observe(ObserveOptions::direct(), callback);
        cell.set(0);
        assert!(log.borrow().is_empty());

        cell.set(4);
        assert_eq!(*log.borrow(), vec![25]);
    }

    #[test]
    fn observer_cut_off_by_flush_limit_keeps_firing() {
        use crate::config::EngineConfig;

        Runtime::configure(EngineConfig {
            max_flush_iterations: 1,
            ..EngineConfig::default()
        });

        let a = Cell::new(0);
        let b = Cell::new(0);
        let forward = doubled(&a);
        let mirrored = doubled(&b);

        let _writer = forward.observe(ObserveOptions::direct(), {
            let b = b.clone();
            move |value: &i32| b.set(*value)
        });
        let (log, callback) = recorder();
        let _reader = mirrored.observe(ObserveOptions::direct(), callback);

        // The reader is queued from inside the writer's round and dropped.
        a.set(5);
        assert!(log.borrow().is_empty());
        assert_eq!(mirrored.state(), DirtyState::Clean);
        Runtime::reset();

        b.set(50);
        b.set(60);
        assert_eq!(*log.borrow(), vec![100, 120]);
    }

    #[test]
    fn default_options_follow_configuration() {
        use crate::config::EngineConfig;

        Runtime::configure(EngineConfig {
            default_scheduler: SchedulerKind::Batched,
            ..EngineConfig::default()
        });
        assert_eq!(ObserveOptions::default(), ObserveOptions::batched());
        Runtime::reset();
        assert_eq!(ObserveOptions::default(), ObserveOptions::direct());
    }
}
