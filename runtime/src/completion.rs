//! The completion handshake between a request task and the connection-close
//! handler.
//!
//! Both sides race to move the invocation out of `Dispatched`. Whoever wins
//! the compare-and-swap acts: the task delivers its result (or failure), or the
//! close handler cancels the task. The loser backs off. A task that finishes
//! after cancellation won never writes a response.

use crate::metrics::InvocationMetrics;
use crate::scope::TaskHandle;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use suspend_bridge_core::RequestContext;

/// Lifecycle of one bridged invocation.
///
/// `NotStarted -> Dispatched -> (Completed | Failed | Cancelled)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InvocationState {
    /// The bridge has not launched a task yet
    NotStarted = 0,
    /// A task is running; neither side has settled the invocation
    Dispatched = 1,
    /// The handler returned and its result was delivered
    Completed = 2,
    /// The handler failed and the failure was routed to the host
    Failed = 3,
    /// The connection closed, or the scope shut down, before delivery
    Cancelled = 4,
}

impl InvocationState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Dispatched,
            2 => Self::Completed,
            3 => Self::Failed,
            4 => Self::Cancelled,
            _ => Self::NotStarted,
        }
    }

    /// Whether the invocation reached a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Lower-case label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `done`/`canceled` flag pair, as one atomic state.
#[derive(Debug)]
pub struct Completion {
    state: AtomicU8,
}

impl Completion {
    /// A completion in [`InvocationState::NotStarted`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(InvocationState::NotStarted as u8),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> InvocationState {
        InvocationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The task side finished, successfully or not.
    #[must_use]
    pub fn done(&self) -> bool {
        matches!(
            self.state(),
            InvocationState::Completed | InvocationState::Failed
        )
    }

    /// The cancellation side won.
    #[must_use]
    pub fn canceled(&self) -> bool {
        self.state() == InvocationState::Cancelled
    }

    /// `NotStarted -> Dispatched`.
    pub fn mark_dispatched(&self) -> bool {
        self.transition(InvocationState::NotStarted, InvocationState::Dispatched)
    }

    /// `Dispatched -> Completed`; `false` means cancellation already won.
    pub fn try_complete(&self) -> bool {
        self.transition(InvocationState::Dispatched, InvocationState::Completed)
    }

    /// `Dispatched -> Failed`; `false` means cancellation already won.
    pub fn try_fail(&self) -> bool {
        self.transition(InvocationState::Dispatched, InvocationState::Failed)
    }

    /// `Dispatched -> Cancelled`; `false` means the task already settled it.
    pub fn try_cancel(&self) -> bool {
        self.transition(InvocationState::Dispatched, InvocationState::Cancelled)
    }

    fn transition(&self, from: InvocationState, to: InvocationState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the close handler that cancels `task` if the connection closes
/// before the invocation settles.
pub fn wire_cancellation(
    request: &dyn RequestContext,
    completion: Arc<Completion>,
    task: TaskHandle,
) {
    let request_id = request.request_id();
    request.on_close(Box::new(move || {
        if completion.try_cancel() {
            tracing::debug!(
                request_id = %request_id,
                task_id = %task.id(),
                "Connection closed; cancelling task"
            );
            InvocationMetrics::record_cancellation();
            task.cancel();
        } else {
            tracing::trace!(
                request_id = %request_id,
                state = %completion.state(),
                "Connection closed after invocation settled"
            );
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatched() -> Completion {
        let completion = Completion::new();
        assert!(completion.mark_dispatched());
        completion
    }

    #[test]
    fn starts_not_started() {
        let completion = Completion::new();
        assert_eq!(completion.state(), InvocationState::NotStarted);
        assert!(!completion.done());
        assert!(!completion.canceled());
        assert!(!completion.try_complete());
    }

    #[test]
    fn completion_then_cancel_keeps_completed() {
        let completion = dispatched();
        assert!(completion.try_complete());
        assert!(!completion.try_cancel());

        assert!(completion.done());
        assert!(!completion.canceled());
        assert_eq!(completion.state(), InvocationState::Completed);
    }

    #[test]
    fn cancel_then_completion_keeps_cancelled() {
        let completion = dispatched();
        assert!(completion.try_cancel());
        assert!(!completion.try_complete());
        assert!(!completion.try_fail());

        assert!(completion.canceled());
        assert!(!completion.done());
    }

    #[test]
    fn failure_counts_as_done() {
        let completion = dispatched();
        assert!(completion.try_fail());
        assert!(completion.done());
        assert!(completion.state().is_terminal());
    }

    #[test]
    fn concurrent_race_has_one_winner() {
        for _ in 0..200 {
            let completion = Arc::new(dispatched());
            let racer = Arc::clone(&completion);

            let canceller = std::thread::spawn(move || racer.try_cancel());
            let completed = completion.try_complete();
            let cancelled = canceller.join().unwrap_or(false);

            assert!(completed ^ cancelled);
            assert!(completion.done() ^ completion.canceled());
        }
    }

    #[test]
    fn state_labels() {
        assert_eq!(InvocationState::Cancelled.to_string(), "cancelled");
        assert!(!InvocationState::Dispatched.is_terminal());
    }
}
