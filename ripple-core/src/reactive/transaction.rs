//! Transactions
//!
//! A transaction suspends atomic notifications for a block of writes and
//! delivers them once, when the outermost transaction ends. Transactions
//! nest; only the outermost boundary flushes.
//!
//! [`Transaction`] is a guard: dropping it ends the transaction, so the
//! depth is restored and queued notifications are delivered on every exit
//! path, including early returns and unwinding.

use std::marker::PhantomData;

use crate::graph::{SchedulerKind, UpdateScheduler};

/// Open a transaction without a guard.
///
/// Must be paired with [`end`]. Prefer [`transaction`] or
/// [`Transaction::begin`], which cannot be left unbalanced.
pub fn begin() {
    let depth = UpdateScheduler::begin();
    tracing::trace!(depth, "transaction begin");
}

/// Close a transaction opened with [`begin`].
///
/// Flushes atomic observers when the outermost transaction closes.
///
/// # Panics
///
/// Panics if no transaction is open.
pub fn end() {
    tracing::trace!(depth = UpdateScheduler::depth(), "transaction end");
    UpdateScheduler::end();
}

/// Current transaction nesting depth.
pub fn depth() -> usize {
    UpdateScheduler::depth()
}

/// Scoped transaction. Ends when dropped.
#[must_use = "the transaction ends as soon as the guard is dropped"]
pub struct Transaction {
    // Transactions belong to the thread that opened them.
    _not_send: PhantomData<*const ()>,
}

impl Transaction {
    /// Open a transaction that lasts until the guard is dropped.
    pub fn begin() -> Self {
        begin();
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        end();
    }
}

/// Run `f` inside a transaction.
///
/// Atomic observers invalidated by `f` are notified once, after `f`
/// returns (or unwinds).
pub fn transaction<R>(f: impl FnOnce() -> R) -> R {
    let _tx = Transaction::begin();
    f()
}

/// Run a fallible block inside a transaction.
///
/// Writes made before an error still count: their notifications are
/// delivered when the transaction closes.
pub fn try_transaction<R, E>(f: impl FnOnce() -> Result<R, E>) -> Result<R, E> {
    let _tx = Transaction::begin();
    f()
}

/// Run an invalidation as a transaction of its own and deliver what it
/// queued: direct observers before returning, atomic observers when the
/// implicit transaction closes (unless an outer one is still open).
pub(crate) fn propagate(invalidate: impl FnOnce()) {
    let _tx = Transaction::begin();
    invalidate();
    UpdateScheduler::flush(SchedulerKind::Direct);
}
