//! A subscriber that collects everything it receives.

#![allow(clippy::module_name_repetitions)]

use crate::host::lock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use suspend_bridge_core::{HandlerError, Subscriber, Subscription};
use tokio::sync::watch;

/// How a collected subscription ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// `on_complete`
    Complete,
    /// `on_error`, rendered
    Error(String),
}

struct State<T> {
    items: Vec<T>,
    terminal: Option<Terminal>,
    subscription: Option<Subscription>,
    subscribe_calls: usize,
}

/// [`Subscriber`] storing every signal for later inspection through its
/// [`Collected`] handle.
pub struct CollectingSubscriber<T> {
    state: Arc<Mutex<State<T>>>,
    progress: watch::Sender<u64>,
    initial_request: Option<u64>,
    cancel_after: Option<usize>,
}

/// Test-side view of a [`CollectingSubscriber`].
pub struct Collected<T> {
    state: Arc<Mutex<State<T>>>,
    progress: watch::Receiver<u64>,
}

impl<T: Send + 'static> CollectingSubscriber<T> {
    /// A subscriber that requests nothing until told to.
    #[must_use]
    pub fn with_handle() -> (Self, Collected<T>) {
        let state = Arc::new(Mutex::new(State {
            items: Vec::new(),
            terminal: None,
            subscription: None,
            subscribe_calls: 0,
        }));
        let (progress, observed) = watch::channel(0);
        (
            Self {
                state: Arc::clone(&state),
                progress,
                initial_request: None,
                cancel_after: None,
            },
            Collected {
                state,
                progress: observed,
            },
        )
    }

    /// Request `n` elements from inside `on_subscribe`.
    #[must_use]
    pub const fn with_initial_request(mut self, n: u64) -> Self {
        self.initial_request = Some(n);
        self
    }

    /// Cancel the subscription after receiving `count` elements.
    #[must_use]
    pub const fn cancel_after(mut self, count: usize) -> Self {
        self.cancel_after = Some(count);
        self
    }

    fn bump(&self) {
        self.progress.send_modify(|signals| *signals += 1);
    }
}

impl<T: Send + 'static> Subscriber<T> for CollectingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        {
            let mut state = lock(&self.state);
            state.subscribe_calls += 1;
            state.subscription = Some(subscription.clone());
        }
        if let Some(n) = self.initial_request {
            subscription.request(n);
        }
        self.bump();
    }

    fn on_next(&mut self, item: T) {
        let cancel = {
            let mut state = lock(&self.state);
            state.items.push(item);
            match (self.cancel_after, &state.subscription) {
                (Some(limit), Some(subscription)) if state.items.len() >= limit => {
                    Some(subscription.clone())
                }
                _ => None,
            }
        };
        if let Some(subscription) = cancel {
            subscription.cancel();
        }
        self.bump();
    }

    fn on_error(&mut self, error: HandlerError) {
        lock(&self.state).terminal = Some(Terminal::Error(error.to_string()));
        self.bump();
    }

    fn on_complete(&mut self) {
        lock(&self.state).terminal = Some(Terminal::Complete);
        self.bump();
    }
}

impl<T: Clone> Collected<T> {
    /// Elements received so far.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        lock(&self.state).items.clone()
    }
}

impl<T> Collected<T> {
    /// Number of elements received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    /// Whether no element was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How the subscription ended, if it has.
    #[must_use]
    pub fn terminal(&self) -> Option<Terminal> {
        lock(&self.state).terminal.clone()
    }

    /// How many times `on_subscribe` ran.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        lock(&self.state).subscribe_calls
    }

    /// Signal demand on behalf of the subscriber.
    pub fn request(&self, n: u64) {
        if let Some(subscription) = lock(&self.state).subscription.clone() {
            subscription.request(n);
        }
    }

    /// Cancel on behalf of the subscriber.
    pub fn cancel(&self) {
        if let Some(subscription) = lock(&self.state).subscription.clone() {
            subscription.cancel();
        }
    }

    /// Wait until at least `count` elements arrived.
    pub async fn wait_for_items(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.items.len() >= count)
            .await
    }

    /// Wait until `on_complete` or `on_error` arrived.
    pub async fn wait_terminal(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.terminal.is_some())
            .await
    }

    /// Wait until the subscriber itself has been dropped by its publisher.
    pub async fn wait_released(&self, timeout: Duration) -> bool {
        let mut progress = self.progress.clone();
        tokio::time::timeout(timeout, async {
            while progress.changed().await.is_ok() {}
        })
        .await
        .is_ok()
    }

    async fn wait_until(&self, timeout: Duration, predicate: impl Fn(&State<T>) -> bool) -> bool {
        let mut progress = self.progress.clone();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                if predicate(&lock(&self.state)) {
                    return true;
                }
                if progress.changed().await.is_err() {
                    return predicate(&lock(&self.state));
                }
            }
        })
        .await;
        waited.unwrap_or(false)
    }
}
