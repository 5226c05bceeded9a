//! Update Scheduler
//!
//! The scheduler decides when invalidated observers get to re-evaluate.
//! Each observer picks one of three policies when it is registered:
//!
//! - [`SchedulerKind::Direct`]: the observer runs before the write that
//!   invalidated it returns.
//! - [`SchedulerKind::Batched`]: the first invalidation of a turn schedules
//!   one flush on the host task queue; everything invalidated before that
//!   flush runs coalesces into it.
//! - [`SchedulerKind::Atomic`]: the observer runs when the outermost
//!   transaction closes. Outside transactions every write is its own
//!   transaction.
//!
//! # Queues
//!
//! Every policy has its own pending set, ordered by insertion. An observer
//! that is invalidated several times before a flush appears once. Flushes
//! hold weak references and check liveness when they run, so an observer
//! disposed after being queued is skipped.
//!
//! A flush drains its queue in rounds until it is empty: notifications
//! queued while a flush runs are delivered by the same flush instead of by a
//! reentrant one. The number of rounds is capped by
//! [`EngineConfig::max_flush_iterations`](crate::config::EngineConfig).
//! Observers still pending when the cap is hit are abandoned: they skip
//! this notification but keep receiving later ones.

use std::cell::RefCell;
use std::fmt;
use std::rc::Weak;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::node::NodeId;
use crate::error::ConfigError;
use crate::reactive::Runtime;

/// When an observer re-evaluates after being invalidated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Synchronously, before the triggering write returns.
    #[default]
    Direct,

    /// Once per turn, from the host task queue.
    Batched,

    /// Once, when the outermost transaction ends.
    Atomic,
}

impl SchedulerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerKind::Direct => "direct",
            SchedulerKind::Batched => "batched",
            SchedulerKind::Atomic => "atomic",
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(SchedulerKind::Direct),
            "batched" => Ok(SchedulerKind::Batched),
            "atomic" => Ok(SchedulerKind::Atomic),
            other => Err(ConfigError::UnknownScheduler(other.to_owned())),
        }
    }
}

/// Something the scheduler can run when a flush reaches it.
pub(crate) trait Notify {
    fn node_id(&self) -> NodeId;

    /// Whether the node still wants notifications.
    fn is_live(&self) -> bool;

    fn notify(&self);

    /// Called instead of [`Notify::notify`] when a flush that gave up
    /// drops the node. The node must get back in a state where the next
    /// invalidation reaches it again.
    fn abandon(&self);
}

#[derive(Default)]
struct PendingQueue {
    pending: IndexMap<NodeId, Weak<dyn Notify>>,
    flushing: bool,
}

#[derive(Default)]
struct SchedulerState {
    direct: PendingQueue,
    batched: PendingQueue,
    atomic: PendingQueue,

    /// Whether a batched flush is waiting on the host task queue.
    batch_scheduled: bool,

    /// Transaction nesting depth.
    depth: usize,
}

impl SchedulerState {
    fn queue_mut(&mut self, kind: SchedulerKind) -> &mut PendingQueue {
        match kind {
            SchedulerKind::Direct => &mut self.direct,
            SchedulerKind::Batched => &mut self.batched,
            SchedulerKind::Atomic => &mut self.atomic,
        }
    }

    fn queue(&self, kind: SchedulerKind) -> &PendingQueue {
        match kind {
            SchedulerKind::Direct => &self.direct,
            SchedulerKind::Batched => &self.batched,
            SchedulerKind::Atomic => &self.atomic,
        }
    }
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Resets the queue's flushing flag, even if an observer panics.
struct FlushGuard(SchedulerKind);

impl Drop for FlushGuard {
    fn drop(&mut self) {
        SCHEDULER.with(|state| state.borrow_mut().queue_mut(self.0).flushing = false);
    }
}

/// The current thread's update scheduler.
pub struct UpdateScheduler;

impl UpdateScheduler {
    /// Queue `observer` under `kind`'s policy.
    ///
    /// Queuing an observer that is already pending is a no-op, so the
    /// original position decides the notification order.
    pub(crate) fn enqueue(kind: SchedulerKind, id: NodeId, observer: Weak<dyn Notify>) {
        let schedule_batch = SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            state.queue_mut(kind).pending.entry(id).or_insert(observer);
            let first = kind == SchedulerKind::Batched && !state.batch_scheduled;
            if first {
                state.batch_scheduled = true;
            }
            first
        });
        tracing::trace!(observer = %id, scheduler = %kind, "notification queued");

        if schedule_batch {
            tracing::trace!("scheduling batched flush");
            Runtime::task_queue().schedule(Box::new(|| Self::flush(SchedulerKind::Batched)));
        }
    }

    /// Deliver every notification pending under `kind`.
    ///
    /// Returns without doing anything if a flush of the same queue is
    /// already running further up the stack; that flush picks up whatever
    /// was queued in the meantime.
    pub(crate) fn flush(kind: SchedulerKind) {
        let started = SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            if kind == SchedulerKind::Batched {
                state.batch_scheduled = false;
            }
            let queue = state.queue_mut(kind);
            if queue.flushing || queue.pending.is_empty() {
                return false;
            }
            queue.flushing = true;
            true
        });
        if !started {
            return;
        }

        let _guard = FlushGuard(kind);
        let max_rounds = Runtime::config().max_flush_iterations;
        let mut rounds = 0;

        loop {
            let batch = SCHEDULER.with(|state| {
                std::mem::take(&mut state.borrow_mut().queue_mut(kind).pending)
            });
            if batch.is_empty() {
                break;
            }
            if rounds == max_rounds {
                tracing::error!(
                    scheduler = %kind,
                    dropped = batch.len(),
                    max_rounds,
                    "flush did not settle; dropping pending notifications"
                );
                for observer in batch.into_values().filter_map(|observer| observer.upgrade()) {
                    if observer.is_live() {
                        observer.abandon();
                    }
                }
                break;
            }
            rounds += 1;
            tracing::debug!(scheduler = %kind, observers = batch.len(), round = rounds, "flushing");

            for observer in batch.into_values() {
                let Some(observer) = observer.upgrade() else {
                    continue;
                };
                if observer.is_live() {
                    tracing::trace!(observer = %observer.node_id(), scheduler = %kind, "notifying");
                    observer.notify();
                }
            }
        }
    }

    /// Enter a transaction. Returns the new depth.
    pub(crate) fn begin() -> usize {
        SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            state.depth += 1;
            state.depth
        })
    }

    /// Leave a transaction, flushing atomic observers if it was the
    /// outermost one.
    ///
    /// # Panics
    ///
    /// Panics if no transaction is open.
    pub(crate) fn end() {
        let remaining = SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            state.depth = state
                .depth
                .checked_sub(1)
                .expect("transaction depth underflow: end() called without a matching begin()");
            state.depth
        });

        if remaining == 0 {
            Self::flush(SchedulerKind::Atomic);
        }
    }

    /// Current transaction depth.
    pub fn depth() -> usize {
        SCHEDULER.with(|state| state.borrow().depth)
    }

    /// Number of observers waiting under `kind`.
    pub fn pending(kind: SchedulerKind) -> usize {
        SCHEDULER.with(|state| state.borrow().queue(kind).pending.len())
    }

    /// Whether a batched flush is waiting on the host task queue.
    pub fn is_batch_scheduled() -> bool {
        SCHEDULER.with(|state| state.borrow().batch_scheduled)
    }
}
