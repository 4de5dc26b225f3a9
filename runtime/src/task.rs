//! Dispatched tasks: futures whose every poll is scheduled by a [`Dispatcher`].
//!
//! A task launched on a [`TaskScope`](crate::TaskScope) is never driven by a
//! tokio worker. Its waker hands a [`Continuation`] to the task's dispatcher,
//! which decides where and with what ambient state the next poll runs. This is
//! what keeps request work on the connection's event loop no matter which
//! thread woke it.
//!
//! # Invariants
//!
//! - At most one continuation per task is outstanding (`scheduled` flag)
//! - No two polls of the same task overlap (the cell's lock)
//! - A continuation dropped without being resumed abandons the task

use crate::metrics::DispatchMetrics;
use futures::future::BoxFuture;
use futures::task::{ArcWake, waker_ref};
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::task::{Context, Poll};

/// Identifier of a task launched on a [`TaskScope`](crate::TaskScope).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a new `TaskId`.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw identifier.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Decides where a task's next poll runs.
///
/// Implementations must never resume the continuation inline from
/// `dispatch`; they hand it to some execution context that runs it later.
/// Dropping the continuation instead of resuming it abandons the task.
pub trait Dispatcher: Send + Sync + 'static {
    /// Schedule `continuation` to be resumed.
    fn dispatch(&self, continuation: Continuation);
}

/// The shared state of one dispatched task.
pub(crate) struct TaskCell {
    id: TaskId,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    scheduled: AtomicBool,
    abandoned: AtomicBool,
    dispatcher: Arc<dyn Dispatcher>,
}

impl TaskCell {
    pub(crate) fn new(
        id: TaskId,
        future: BoxFuture<'static, ()>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            future: Mutex::new(Some(future)),
            scheduled: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            dispatcher,
        })
    }

    /// Hand a continuation to the dispatcher unless one is already pending.
    pub(crate) fn schedule(self: &Arc<Self>) {
        if self.abandoned.load(Ordering::Acquire) {
            return;
        }
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::trace!(task_id = %self.id, "Scheduling continuation");
        DispatchMetrics::record_dispatch();
        self.dispatcher.dispatch(Continuation {
            cell: Some(Arc::clone(self)),
        });
    }

    fn poll(self: &Arc<Self>) {
        let mut slot = self.future.lock().unwrap_or_else(PoisonError::into_inner);

        // Cleared before polling so a wake during the poll schedules again
        self.scheduled.store(false, Ordering::Release);

        let Some(future) = slot.as_mut() else {
            return;
        };

        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);

        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => {
                if self.abandoned.load(Ordering::Acquire) {
                    *slot = None;
                }
            }
            Ok(Poll::Ready(())) => {
                tracing::trace!(task_id = %self.id, "Task finished");
                *slot = None;
            }
            Err(payload) => {
                tracing::error!(
                    task_id = %self.id,
                    panic = %panic_message(payload.as_ref()),
                    "Task panicked outside its handler; dropping it"
                );
                *slot = None;
            }
        }
    }

    fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
        DispatchMetrics::record_drop();

        // A poll in progress on this thread sees the flag and drops the future itself
        let future = match self.future.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
            Err(TryLockError::WouldBlock) => None,
        };

        if future.is_some() {
            tracing::warn!(task_id = %self.id, "Continuation dropped; abandoning task");
        }
        drop(future);
    }
}

impl ArcWake for TaskCell {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.schedule();
    }
}

/// One pending poll of a dispatched task.
///
/// Resuming runs the poll on the calling thread. Dropping an unresumed
/// continuation abandons the task: its future is dropped, releasing
/// everything it holds.
#[must_use = "dropping a continuation abandons its task"]
pub struct Continuation {
    cell: Option<Arc<TaskCell>>,
}

impl Continuation {
    /// The task this continuation belongs to.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.cell.as_ref().map(|cell| cell.id)
    }

    /// Poll the task once on the current thread.
    pub fn resume(mut self) {
        if let Some(cell) = self.cell.take() {
            cell.poll();
        }
    }

    /// Give up on the task without polling it again.
    pub fn abandon(mut self) {
        if let Some(cell) = self.cell.take() {
            cell.abandon();
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.abandon();
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("task_id", &self.task_id())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
