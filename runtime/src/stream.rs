//! Stream adapter: lazy element sequences exposed as [`Publisher`]s.
//!
//! Subscribing spawns a pump that pulls exactly one element from the source
//! per unit of subscriber demand. Nothing is read ahead, so a subscriber
//! that never requests never causes a pull.

use crate::metrics::StreamMetrics;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use suspend_bridge_core::{Demand, HandlerError, Publisher, Subscriber, Subscription};

/// Pulls between voluntary yields, so an always-ready source cannot starve
/// other tasks on the same worker.
const YIELD_EVERY: u64 = 32;

/// Publishes the elements of a stream under subscriber-controlled demand.
///
/// # Example
///
/// ```ignore
/// let publisher = StreamPublisher::from_values(vec![1, 2, 3]);
/// Box::new(publisher).subscribe(Box::new(subscriber));
/// ```
pub struct StreamPublisher<T> {
    source: BoxStream<'static, Result<T, HandlerError>>,
}

impl<T: Send + 'static> StreamPublisher<T> {
    /// Wrap a fallible stream.
    #[must_use]
    pub fn new<S>(source: S) -> Self
    where
        S: Stream<Item = Result<T, HandlerError>> + Send + 'static,
    {
        Self {
            source: source.boxed(),
        }
    }

    /// Publish a fixed sequence of values.
    #[must_use]
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(values.into_iter().map(Ok)))
    }
}

impl<T: Send + 'static> Publisher<T> for StreamPublisher<T> {
    fn subscribe(self: Box<Self>, mut subscriber: Box<dyn Subscriber<T>>) {
        let subscription = Subscription::new();
        subscriber.on_subscribe(subscription.clone());

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(pump(self.source, subscriber, subscription));
            }
            Err(error) => {
                tracing::error!(%error, "Stream subscribed outside a tokio runtime");
                subscriber.on_error(HandlerError::failed(format!(
                    "no runtime to drive the stream: {error}"
                )));
            }
        }
    }
}

async fn pump<T: Send + 'static>(
    mut source: BoxStream<'static, Result<T, HandlerError>>,
    mut subscriber: Box<dyn Subscriber<T>>,
    subscription: Subscription,
) {
    let mut emitted: u64 = 0;

    loop {
        match subscription.acquire().await {
            Demand::Granted => {}
            Demand::Cancelled => {
                tracing::debug!(emitted, "Subscription cancelled; releasing stream");
                StreamMetrics::record_terminal("cancelled");
                return;
            }
            Demand::Invalid => {
                tracing::debug!(emitted, "Subscriber requested zero elements");
                StreamMetrics::record_terminal("invalid_demand");
                subscriber.on_error(HandlerError::InvalidDemand);
                return;
            }
        }

        let next = tokio::select! {
            biased;
            () = subscription.cancelled() => {
                StreamMetrics::record_terminal("cancelled");
                return;
            }
            next = source.next() => next,
        };

        match next {
            Some(Ok(item)) => {
                subscriber.on_next(item);
                emitted += 1;
                StreamMetrics::record_element();
                if emitted % YIELD_EVERY == 0 {
                    tokio::task::yield_now().await;
                }
            }
            Some(Err(error)) => {
                tracing::debug!(emitted, %error, "Stream failed");
                StreamMetrics::record_terminal("error");
                subscriber.on_error(error);
                return;
            }
            None => {
                tracing::trace!(emitted, "Stream completed");
                StreamMetrics::record_terminal("complete");
                subscriber.on_complete();
                return;
            }
        }
    }
}
