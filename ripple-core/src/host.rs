//! Host Task Queues
//!
//! The batched scheduler defers its flush to "after the current turn". What
//! a turn is depends on the host, so the deferral goes through the
//! [`TaskQueue`] trait:
//!
//! - [`MicrotaskQueue`] is the default. Tasks accumulate in a thread-local
//!   queue until the host calls [`run_microtasks`], typically once per
//!   iteration of its event loop.
//! - [`TokioTaskQueue`] spawns each task onto the current tokio `LocalSet`,
//!   so it runs as soon as the running task yields.

use std::cell::RefCell;
use std::collections::VecDeque;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// A "run after the current turn" primitive supplied by the host.
pub trait TaskQueue {
    /// Schedule `task` to run after the current synchronous turn.
    fn schedule(&self, task: Task);
}

thread_local! {
    static MICROTASKS: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
}

/// Thread-local FIFO of deferred tasks, drained by [`run_microtasks`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrotaskQueue;

impl TaskQueue for MicrotaskQueue {
    fn schedule(&self, task: Task) {
        MICROTASKS.with(|queue| queue.borrow_mut().push_back(task));
    }
}

/// Run queued microtasks until the queue is empty.
///
/// Tasks scheduled by running tasks are run too. Returns how many tasks ran.
pub fn run_microtasks() -> usize {
    let mut ran = 0;
    // The queue borrow is released before each task runs, since tasks may
    // schedule more tasks.
    while let Some(task) = MICROTASKS.with(|queue| queue.borrow_mut().pop_front()) {
        task();
        ran += 1;
    }
    ran
}

/// Number of microtasks waiting to run.
pub fn pending_microtasks() -> usize {
    MICROTASKS.with(|queue| queue.borrow().len())
}

/// Defers tasks to the tokio `LocalSet` the caller runs on.
///
/// Scheduling panics if called outside of a `LocalSet`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTaskQueue;

impl TaskQueue for TokioTaskQueue {
    fn schedule(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn microtasks_run_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            MicrotaskQueue.schedule(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(pending_microtasks(), 3);
        assert!(log.borrow().is_empty());

        assert_eq!(run_microtasks(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(pending_microtasks(), 0);
    }

    #[test]
    fn microtasks_scheduled_while_draining_run_too() {
        let ran = Rc::new(Cell::new(0));
        let ran_clone = ran.clone();
        MicrotaskQueue.schedule(Box::new(move || {
            ran_clone.set(ran_clone.get() + 1);
            let ran_inner = ran_clone.clone();
            MicrotaskQueue.schedule(Box::new(move || ran_inner.set(ran_inner.get() + 1)));
        }));

        assert_eq!(run_microtasks(), 2);
        assert_eq!(ran.get(), 2);
    }

    #[tokio::test]
    async fn tokio_queue_runs_on_local_set() {
        let ran = Rc::new(Cell::new(false));
        let local = tokio::task::LocalSet::new();

        let ran_clone = ran.clone();
        local
            .run_until(async move {
                TokioTaskQueue.schedule(Box::new(move || ran_clone.set(true)));
                tokio::task::yield_now().await;
            })
            .await;
        local.await;

        assert!(ran.get());
    }
}
