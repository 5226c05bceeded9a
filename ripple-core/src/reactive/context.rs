//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell or computation is
//! read, the current computation is registered as one of its dependents.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When a computation evaluates, an entry is pushed onto the stack; every
//! tracked read appends to that entry. The guard returned by
//! [`ReactiveContext::enter`] pops the entry when dropped, so the stack stays
//! balanced even if the derivation panics.
//!
//! Nested computations (a computation that reads another computation) push
//! their own entries, so each one only sees its own reads. An untracked
//! entry masks the entries below it.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::runtime::{Reactive, Source};
use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// The subscriber an evaluation reports its reads to.
#[derive(Clone)]
struct Tracker {
    id: NodeId,
    subscriber: Weak<dyn Reactive>,
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// `None` for untracked scopes.
    tracker: Option<Tracker>,
    /// Dependencies collected during this evaluation, in first-read order.
    dependencies: Dependencies,
}

/// A source read during an evaluation, with the version that was observed.
#[derive(Clone)]
pub(crate) struct Dependency {
    pub(crate) source: Rc<dyn Source>,
    pub(crate) version: u64,
}

/// Dependencies keyed by source, in first-read order.
pub(crate) type Dependencies = IndexMap<NodeId, Dependency>;

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    id: Option<NodeId>,
}

impl ReactiveContext {
    /// Enter a new tracking context for the given subscriber.
    pub(crate) fn enter(id: NodeId, subscriber: Weak<dyn Reactive>) -> Self {
        Self::push(Some(Tracker { id, subscriber }))
    }

    /// Enter a context in which reads are not tracked.
    pub(crate) fn enter_untracked() -> Self {
        Self::push(None)
    }

    fn push(tracker: Option<Tracker>) -> Self {
        let id = tracker.as_ref().map(|tracker| tracker.id);
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                tracker,
                dependencies: Dependencies::new(),
            });
        });
        Self { id }
    }

    /// Whether reads performed right now would be tracked.
    pub fn is_tracking() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.tracker.is_some())
        })
    }

    /// Record a read of `source` in the innermost context.
    ///
    /// Registers the evaluating node as a dependent of `source` the first
    /// time it is read during this evaluation. Reads of the evaluating node
    /// itself are ignored; those are reported as cycles by the reader.
    pub(crate) fn track(source: Rc<dyn Source>) {
        let source_id = source.node_id();
        let tracker = CONTEXT_STACK.with(|stack| {
            let stack = stack.borrow();
            let entry = stack.last()?;
            let tracker = entry.tracker.as_ref()?;
            let seen = entry.dependencies.contains_key(&source_id);
            (!seen && tracker.id != source_id).then(|| tracker.clone())
        });
        let Some(tracker) = tracker else {
            return;
        };

        tracing::trace!(source = %source_id, subscriber = %tracker.id, "tracked read");
        source.add_dependent(tracker.id, tracker.subscriber);

        let version = source.version();
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                entry
                    .dependencies
                    .insert(source_id, Dependency { source, version });
            }
        });
    }

    /// Take the dependencies collected by this context so far.
    pub(crate) fn take_dependencies(&self) -> Dependencies {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.last_mut() {
                Some(entry) => {
                    debug_assert_eq!(entry.tracker.as_ref().map(|t| t.id), self.id);
                    std::mem::take(&mut entry.dependencies)
                }
                None => Dependencies::new(),
            }
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Contexts must be dropped in the order they were entered.
            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.tracker.map(|tracker| tracker.id),
                    self.id,
                    "ReactiveContext mismatch"
                );
            }
        });
    }
}

/// Run `f` without tracking any reads it performs.
///
/// Cells and computations read inside `f` do not become dependencies of the
/// computation currently evaluating.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter_untracked();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::graph::DirtyState;
    use std::cell::Cell;

    struct FakeSource {
        id: NodeId,
        version: Cell<u64>,
        dependents: RefCell<Vec<NodeId>>,
    }

    impl FakeSource {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                id: NodeId::new(),
                version: Cell::new(3),
                dependents: RefCell::new(Vec::new()),
            })
        }
    }

    impl Source for FakeSource {
        fn node_id(&self) -> NodeId {
            self.id
        }

        fn version(&self) -> u64 {
            self.version.get()
        }

        fn refresh(&self) -> Result<(), ReactiveError> {
            Ok(())
        }

        fn add_dependent(&self, id: NodeId, _dependent: Weak<dyn Reactive>) {
            self.dependents.borrow_mut().push(id);
        }

        fn remove_dependent(&self, id: NodeId) {
            self.dependents.borrow_mut().retain(|dep| *dep != id);
        }
    }

    struct FakeSubscriber {
        id: NodeId,
    }

    impl Reactive for FakeSubscriber {
        fn mark(&self, _state: DirtyState) {}
    }

    fn subscriber() -> (Rc<FakeSubscriber>, Weak<dyn Reactive>) {
        let sub = Rc::new(FakeSubscriber { id: NodeId::new() });
        let weak = Rc::downgrade(&sub) as Weak<dyn Reactive>;
        (sub, weak)
    }

    #[test]
    fn context_tracks_subscriber() {
        let (sub, weak) = subscriber();

        assert!(!ReactiveContext::is_tracking());

        {
            let _ctx = ReactiveContext::enter(sub.id, weak);
            assert!(ReactiveContext::is_tracking());
        }

        assert!(!ReactiveContext::is_tracking());
    }

    #[test]
    fn context_tracks_dependencies_once() {
        let (sub, weak) = subscriber();
        let a = FakeSource::new();
        let b = FakeSource::new();

        let ctx = ReactiveContext::enter(sub.id, weak);
        ReactiveContext::track(a.clone());
        ReactiveContext::track(b.clone());
        ReactiveContext::track(a.clone());

        let deps = ctx.take_dependencies();
        let ids: Vec<_> = deps.keys().copied().collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert!(deps.values().all(|dep| dep.version == 3));
        assert_eq!(*a.dependents.borrow(), vec![sub.id]);
    }

    #[test]
    fn nested_contexts() {
        let (outer, outer_weak) = subscriber();
        let (inner, inner_weak) = subscriber();
        let read_by_outer = FakeSource::new();
        let read_by_inner = FakeSource::new();

        {
            let ctx1 = ReactiveContext::enter(outer.id, outer_weak);

            {
                let ctx2 = ReactiveContext::enter(inner.id, inner_weak);
                ReactiveContext::track(read_by_inner.clone());
                assert_eq!(ctx2.take_dependencies().len(), 1);
            }

            ReactiveContext::track(read_by_outer.clone());
            let deps = ctx1.take_dependencies();
            assert_eq!(deps.keys().copied().collect::<Vec<_>>(), vec![read_by_outer.id]);
        }

        assert!(!ReactiveContext::is_tracking());
        assert_eq!(*read_by_inner.dependents.borrow(), vec![inner.id]);
        assert_eq!(*read_by_outer.dependents.borrow(), vec![outer.id]);
    }

    #[test]
    fn untracked_masks_outer_context() {
        let (sub, weak) = subscriber();
        let source = FakeSource::new();

        let ctx = ReactiveContext::enter(sub.id, weak);
        untracked(|| {
            assert!(!ReactiveContext::is_tracking());
            ReactiveContext::track(source.clone());
        });
        assert!(ReactiveContext::is_tracking());

        assert!(ctx.take_dependencies().is_empty());
        assert!(source.dependents.borrow().is_empty());
    }

    #[test]
    fn reads_of_self_are_ignored() {
        let source = FakeSource::new();
        let (_sub, weak) = subscriber();

        let ctx = ReactiveContext::enter(source.id, weak);
        ReactiveContext::track(source.clone());
        assert!(ctx.take_dependencies().is_empty());
    }
}
