//! The process-wide task scope.
//!
//! Every request task is launched as a child of one [`TaskScope`], created
//! explicitly at application startup and shut down explicitly when the
//! application stops. Shutdown cancels every outstanding child and waits,
//! bounded, for them to settle. A failing child never takes the scope down.

use crate::config::BridgeConfig;
use crate::metrics::TaskMetrics;
use crate::task::{Dispatcher, TaskCell, TaskId};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use suspend_bridge_core::BridgeError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Supervisor of all request tasks.
///
/// # Example
///
/// ```ignore
/// let tasks = Arc::new(TaskScope::new());
///
/// let handle = tasks.launch(dispatcher, |token| async move {
///     token.cancelled().await;
/// })?;
///
/// tasks.shutdown(Duration::from_secs(5)).await?;
/// assert!(handle.is_settled());
/// ```
pub struct TaskScope {
    root: CancellationToken,
    tracker: TaskTracker,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    config: BridgeConfig,
}

impl TaskScope {
    /// Create a scope with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    /// Create a scope with a custom configuration.
    #[must_use]
    pub fn with_config(config: BridgeConfig) -> Self {
        tracing::info!(
            identity = config.identity.name(),
            generation = config.identity.generation(),
            "Task scope created"
        );
        Self {
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            config,
        }
    }

    /// The configuration this scope was created with.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Launch `body` as a cancellable child of this scope.
    ///
    /// `body` receives the child's cancellation token. The task's first poll
    /// is handed to `dispatcher` like every later one; nothing runs inline.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ShutdownInProgress`] once [`shutdown`](Self::shutdown)
    /// has been called.
    pub fn launch<B, Fut>(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        body: B,
    ) -> Result<TaskHandle, BridgeError>
    where
        B: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(BridgeError::ShutdownInProgress);
        }

        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let token = self.root.child_token();
        let (settled_tx, settled_rx) = watch::channel(false);

        let guard = SettleGuard {
            id,
            settled: settled_tx,
            started: Instant::now(),
        };
        let work = body(token.clone());
        let future = self.tracker.track_future(async move {
            let _guard = guard;
            work.await;
        });

        TaskMetrics::record_launch();
        tracing::debug!(task_id = %id, live = self.tracker.len(), "Task launched");

        TaskCell::new(id, Box::pin(future), dispatcher).schedule();

        Ok(TaskHandle {
            id,
            token,
            settled: settled_rx,
        })
    }

    /// Cancel every child and wait up to `timeout` for them to settle.
    ///
    /// Idempotent; later launches fail with [`BridgeError::ShutdownInProgress`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ShutdownTimeout`] with the number of tasks still
    /// live when the timeout elapsed.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), BridgeError> {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::info!(live = self.tracker.len(), "Shutting down task scope");
        }

        self.root.cancel();
        self.tracker.close();

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            tracing::info!("Task scope shut down");
            Ok(())
        } else {
            let live = self.tracker.len();
            tracing::warn!(live, ?timeout, "Task scope shutdown timed out");
            Err(BridgeError::ShutdownTimeout(live))
        }
    }

    /// Shut down using the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`shutdown`](Self::shutdown).
    pub async fn shutdown_default(&self) -> Result<(), BridgeError> {
        self.shutdown(self.config.shutdown_timeout).await
    }

    /// Number of tasks launched and not yet settled.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScope")
            .field("live_tasks", &self.live_tasks())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Marks the task settled when its future completes or is dropped.
struct SettleGuard {
    id: TaskId,
    settled: watch::Sender<bool>,
    started: Instant,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.settled.send_replace(true);
        TaskMetrics::record_settle(self.started.elapsed());
        tracing::trace!(task_id = %self.id, "Task settled");
    }
}

/// Handle to a launched task.
///
/// Cloning yields another handle to the same task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    token: CancellationToken,
    settled: watch::Receiver<bool>,
}

impl TaskHandle {
    /// The task's identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Request cooperative cancellation.
    ///
    /// The task observes it at its next suspension point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested, directly or through shutdown.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the task has finished or been dropped.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    /// Wait until the task settles.
    pub async fn settled(&self) {
        let mut settled = self.settled.clone();
        // The guard always publishes `true` before dropping the sender
        let _ = settled.wait_for(|done| *done).await;
    }

    /// Wait up to `timeout` for the task to settle; returns whether it did.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.settled()).await.is_ok()
    }
}
