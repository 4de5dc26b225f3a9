//! The subscription-based publisher abstraction consumed by the host's
//! streaming response writer.
//!
//! This is the minimal reactive-streams surface the writer needs: a
//! [`Publisher`] is subscribed once, the [`Subscriber`] receives a
//! [`Subscription`] and pulls elements by signalling demand, and either side
//! may stop the flow (`cancel` from the subscriber, `on_complete`/`on_error`
//! from the publisher).

use crate::error::HandlerError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Source of elements delivered under subscriber-controlled demand.
pub trait Publisher<T>: Send + 'static {
    /// Attach `subscriber`; it receives `on_subscribe` before any element.
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>);
}

/// Receiver of a publisher's signals.
///
/// Signals are delivered sequentially; after `on_complete` or `on_error` no
/// further signal arrives.
pub trait Subscriber<T>: Send + 'static {
    /// Called once with the handle used to request elements or cancel.
    fn on_subscribe(&mut self, subscription: Subscription);

    /// One element, delivered only against outstanding demand.
    fn on_next(&mut self, item: T);

    /// The sequence failed; terminal.
    fn on_error(&mut self, error: HandlerError);

    /// The sequence ended; terminal.
    fn on_complete(&mut self);
}

/// Outcome of waiting for demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    /// One unit of demand was consumed; the publisher may emit one element.
    Granted,

    /// The subscriber cancelled; the publisher must stop.
    Cancelled,

    /// The subscriber requested zero elements; the publisher must signal
    /// [`HandlerError::InvalidDemand`].
    Invalid,
}

struct DemandState {
    requested: AtomicU64,
    invalid: AtomicBool,
    wakeup: Notify,
    cancel: CancellationToken,
}

/// Shared handle linking a subscriber's demand to its publisher.
///
/// Cloning yields another handle to the same subscription.
#[derive(Clone)]
pub struct Subscription {
    state: Arc<DemandState>,
}

impl Subscription {
    /// Create a subscription with no outstanding demand.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(DemandState {
                requested: AtomicU64::new(0),
                invalid: AtomicBool::new(false),
                wakeup: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Add `n` elements of demand. `u64::MAX` means unbounded.
    ///
    /// Requesting zero is a protocol violation reported to the subscriber
    /// through `on_error`.
    pub fn request(&self, n: u64) {
        if n == 0 {
            self.state.invalid.store(true, Ordering::Release);
        } else {
            // Saturates at u64::MAX, which stays effectively unbounded
            let _ = self
                .state
                .requested
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    Some(current.saturating_add(n))
                });
        }
        self.state.wakeup.notify_one();
    }

    /// Stop the flow; the publisher stops pulling from its source.
    pub fn cancel(&self) {
        self.state.cancel.cancel();
        self.state.wakeup.notify_one();
    }

    /// Whether [`cancel`](Subscription::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    /// Demand not yet consumed by the publisher.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.state.requested.load(Ordering::Acquire)
    }

    /// Completes when the subscription is cancelled.
    pub async fn cancelled(&self) {
        self.state.cancel.cancelled().await;
    }

    /// Wait until one unit of demand is available and consume it.
    ///
    /// Publisher side of the protocol: call once before emitting each element.
    pub async fn acquire(&self) -> Demand {
        loop {
            let notified = self.state.wakeup.notified();

            if self.is_cancelled() {
                return Demand::Cancelled;
            }
            if self.state.invalid.load(Ordering::Acquire) {
                return Demand::Invalid;
            }
            if self.try_take() {
                return Demand::Granted;
            }

            tokio::select! {
                () = notified => {}
                () = self.state.cancel.cancelled() => return Demand::Cancelled,
            }
        }
    }

    fn try_take(&self) -> bool {
        self.state
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            })
            .is_ok()
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("outstanding", &self.outstanding())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[tokio::test]
    async fn acquire_consumes_one_unit_per_call() {
        let subscription = Subscription::new();
        subscription.request(2);

        assert_eq!(subscription.acquire().await, Demand::Granted);
        assert_eq!(subscription.acquire().await, Demand::Granted);
        assert_eq!(subscription.outstanding(), 0);
    }

    #[test]
    fn acquire_waits_for_demand() {
        let subscription = Subscription::new();
        let mut acquire = task::spawn(subscription.acquire());

        assert_pending!(acquire.poll());

        subscription.request(1);
        assert!(acquire.is_woken());
        assert_ready_eq!(acquire.poll(), Demand::Granted);
    }

    #[test]
    fn cancel_releases_waiting_publisher() {
        let subscription = Subscription::new();
        let mut acquire = task::spawn(subscription.acquire());

        assert_pending!(acquire.poll());
        subscription.cancel();
        assert_ready_eq!(acquire.poll(), Demand::Cancelled);
    }

    #[tokio::test]
    async fn zero_demand_is_invalid() {
        let subscription = Subscription::new();
        subscription.request(0);
        assert_eq!(subscription.acquire().await, Demand::Invalid);
    }

    #[test]
    fn unbounded_demand_saturates() {
        let subscription = Subscription::new();
        subscription.request(u64::MAX);
        subscription.request(10);
        assert_eq!(subscription.outstanding(), u64::MAX);
    }

    proptest! {
        #[test]
        fn demand_is_granted_exactly_as_often_as_requested(
            requests in proptest::collection::vec(1u64..50, 0..10)
        ) {
            let subscription = Subscription::new();
            for n in &requests {
                subscription.request(*n);
            }
            let total: u64 = requests.iter().sum();
            prop_assert_eq!(subscription.outstanding(), total);

            let mut granted = 0;
            while subscription.try_take() {
                granted += 1;
            }
            prop_assert_eq!(granted, total);
            prop_assert_eq!(subscription.outstanding(), 0);
        }
    }
}
