//! A reference [`HostExecutor`]: one tokio task draining a FIFO of jobs.
//!
//! Real hosts bring their own event loop (a Netty/Vert.x style connection
//! thread, a `LocalSet`, a GUI loop). [`EventLoop`] gives the same guarantees
//! with plain tokio so the bridge can be run and tested without a server:
//! jobs run one at a time, in submission order, never inline with
//! [`run_on_context`](HostExecutor::run_on_context).

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use suspend_bridge_core::{BridgeError, CurrentRequest, HostExecutor, Job};
use tokio::sync::{mpsc, oneshot};

use crate::task::panic_message;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static LOOP_ID: u64;
}

/// Single-threaded job loop standing in for a connection's event loop.
pub struct EventLoop {
    id: u64,
    name: String,
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    current: CurrentRequest,
}

impl EventLoop {
    /// Start a new loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, like [`tokio::spawn`].
    #[must_use]
    pub fn spawn(name: impl Into<String>) -> Arc<Self> {
        let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(run(id, name.clone(), rx));
        tracing::debug!(event_loop = %name, "Event loop started");

        Arc::new(Self {
            id,
            name,
            jobs: Mutex::new(Some(tx)),
            current: CurrentRequest::new(),
        })
    }

    /// Stop accepting jobs. Jobs already queued still run.
    pub fn close(&self) {
        let sender = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            tracing::debug!(event_loop = %self.name, "Event loop closed");
        }
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Whether the caller is running on this loop.
    #[must_use]
    pub fn in_context(&self) -> bool {
        LOOP_ID.try_with(|id| *id == self.id).unwrap_or(false)
    }

    /// Wait until every job submitted before this call has run.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ExecutorClosed`] if the loop is closed.
    pub async fn barrier(&self) -> Result<(), BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.run_on_context(Box::new(move || {
            let _ = tx.send(());
        }))?;
        rx.await
            .map_err(|_| BridgeError::ExecutorClosed(self.name.clone()))
    }
}

impl HostExecutor for EventLoop {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_on_context(&self, job: Job) -> Result<(), BridgeError> {
        let rejected = {
            let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            match jobs.as_ref() {
                Some(sender) => sender.send(job).err().map(|error| error.0),
                None => Some(job),
            }
        };

        // Dropped outside the lock: dropping a job may abandon a task
        match rejected {
            None => Ok(()),
            Some(job) => {
                drop(job);
                Err(BridgeError::ExecutorClosed(self.name.clone()))
            }
        }
    }

    fn current_request(&self) -> &CurrentRequest {
        &self.current
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn run(id: u64, name: String, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let outcome = LOOP_ID.sync_scope(id, || catch_unwind(AssertUnwindSafe(job)));
        if let Err(payload) = outcome {
            tracing::error!(
                event_loop = %name,
                panic = %panic_message(payload.as_ref()),
                "Job panicked on event loop"
            );
        }
    }
    tracing::debug!(event_loop = %name, "Event loop drained");
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let event_loop = EventLoop::spawn("ordered");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..5 {
            let seen = Arc::clone(&seen);
            event_loop
                .run_on_context(Box::new(move || {
                    seen.lock().expect("lock").push(n);
                }))
                .expect("open loop");
        }

        event_loop.barrier().await.expect("barrier");
        assert_eq!(*seen.lock().expect("lock"), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn run_on_context_never_runs_inline() {
        let event_loop = EventLoop::spawn("deferred");
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        event_loop
            .run_on_context(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .expect("open loop");
        assert!(!ran.load(Ordering::SeqCst));

        event_loop.barrier().await.expect("barrier");
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn in_context_only_on_own_loop() {
        let first = EventLoop::spawn("first");
        let second = EventLoop::spawn("second");
        assert!(!first.in_context());

        let (tx, rx) = oneshot::channel();
        let inside = Arc::clone(&first);
        let other = Arc::clone(&second);
        first
            .run_on_context(Box::new(move || {
                let _ = tx.send((inside.in_context(), other.in_context()));
            }))
            .expect("open loop");

        assert_eq!(rx.await.expect("context flags"), (true, false));
    }

    #[tokio::test]
    async fn panicking_job_does_not_stop_the_loop() {
        let event_loop = EventLoop::spawn("resilient");
        event_loop
            .run_on_context(Box::new(|| panic!("job failure")))
            .expect("open loop");

        event_loop.barrier().await.expect("loop still running");
    }

    #[tokio::test]
    async fn closed_loop_rejects_jobs() {
        let event_loop = EventLoop::spawn("closing");
        event_loop.close();

        assert!(event_loop.is_closed());
        let result = event_loop.run_on_context(Box::new(|| {}));
        assert!(matches!(result, Err(BridgeError::ExecutorClosed(name)) if name == "closing"));
    }
}
