//! Integration tests for the stream adapter: demand, cancellation, and
//! streaming handler results.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use common::{Harness, SETTLE};
use futures::stream;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use suspend_bridge_core::{HandlerError, HandlerOutput, Publisher};
use suspend_bridge_runtime::{InvocationState, StreamPublisher};
use suspend_bridge_testing::{CollectingSubscriber, Terminal, invoker, suspend_times};

/// An infinite counting stream that records every pull.
fn counting_source(pulls: Arc<AtomicUsize>) -> StreamPublisher<u64> {
    StreamPublisher::new(async_stream::stream! {
        let mut next = 0_u64;
        loop {
            pulls.fetch_add(1, Ordering::SeqCst);
            yield Ok::<_, HandlerError>(next);
            next += 1;
        }
    })
}

#[tokio::test]
async fn elements_arrive_in_source_order_then_complete() {
    let (subscriber, collected) = CollectingSubscriber::<&str>::with_handle();
    let publisher = StreamPublisher::from_values(vec!["a", "b", "c", "d"]);

    Box::new(publisher).subscribe(Box::new(subscriber.with_initial_request(u64::MAX)));

    assert!(collected.wait_terminal(SETTLE).await);
    assert_eq!(collected.items(), vec!["a", "b", "c", "d"]);
    assert_eq!(collected.terminal(), Some(Terminal::Complete));
    assert_eq!(collected.subscribe_calls(), 1);
}

#[tokio::test]
async fn source_is_pulled_only_on_demand() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let (subscriber, collected) = CollectingSubscriber::<u64>::with_handle();

    Box::new(counting_source(Arc::clone(&pulls))).subscribe(Box::new(subscriber));

    // No demand, no pulls
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pulls.load(Ordering::SeqCst), 0);

    collected.request(2);
    assert!(collected.wait_for_items(2, SETTLE).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pulls.load(Ordering::SeqCst), 2);

    collected.request(3);
    assert!(collected.wait_for_items(5, SETTLE).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pulls.load(Ordering::SeqCst), 5);
    assert_eq!(collected.items(), vec![0, 1, 2, 3, 4]);
    assert_eq!(collected.terminal(), None);

    collected.cancel();
    assert!(collected.wait_released(SETTLE).await);
}

#[tokio::test]
async fn cancelling_stops_pulling_from_an_infinite_source() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let (subscriber, collected) = CollectingSubscriber::<u64>::with_handle();
    let subscriber = subscriber.with_initial_request(u64::MAX).cancel_after(3);

    Box::new(counting_source(Arc::clone(&pulls))).subscribe(Box::new(subscriber));

    assert!(collected.wait_released(SETTLE).await);
    assert_eq!(collected.items(), vec![0, 1, 2]);
    assert_eq!(pulls.load(Ordering::SeqCst), 3);
    assert_eq!(collected.terminal(), None);
}

#[tokio::test]
async fn zero_demand_is_reported_as_an_error() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let (subscriber, collected) = CollectingSubscriber::<u64>::with_handle();

    Box::new(counting_source(Arc::clone(&pulls))).subscribe(Box::new(subscriber));
    collected.request(0);

    assert!(collected.wait_terminal(SETTLE).await);
    assert_eq!(
        collected.terminal(),
        Some(Terminal::Error(HandlerError::InvalidDemand.to_string()))
    );
    assert!(collected.is_empty());
    assert_eq!(pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn source_failure_ends_the_subscription() {
    let (subscriber, collected) = CollectingSubscriber::<u32>::with_handle();
    let source = stream::iter(vec![
        Ok(1_u32),
        Ok(2),
        Err(HandlerError::failed("upstream reset")),
        Ok(3),
    ]);

    Box::new(StreamPublisher::new(source))
        .subscribe(Box::new(subscriber.with_initial_request(10)));

    assert!(collected.wait_terminal(SETTLE).await);
    assert_eq!(collected.items(), vec![1, 2]);
    assert_eq!(
        collected.terminal(),
        Some(Terminal::Error("upstream reset".to_string()))
    );
}

#[tokio::test]
async fn streaming_handler_result_is_published_lazily() {
    let harness = Harness::new();
    let pulls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulls);
    let bridge = harness.invocation(invoker("Ticks#stream", move |_instance, _params| {
        let counter = Arc::clone(&counter);
        async move {
            suspend_times(1).await;
            Ok(HandlerOutput::stream(async_stream::stream! {
                let mut tick = 0_u64;
                loop {
                    counter.fetch_add(1, Ordering::SeqCst);
                    yield Ok::<_, HandlerError>(json!({ "tick": tick }));
                    tick += 1;
                }
            }))
        }
    }));
    let request = Arc::new(harness.request(1));

    let dispatch = bridge.handle(request.clone());
    assert_eq!(
        dispatch.handle().expect("dispatched").settled().await,
        InvocationState::Completed
    );
    harness.event_loop.barrier().await.unwrap();
    assert_eq!(request.resume_count(), 1);
    assert_eq!(pulls.load(Ordering::SeqCst), 0);

    // The host's streaming writer takes over from here
    let publisher = request
        .take_result()
        .and_then(|body| body.into_publisher())
        .expect("stream body");
    let (subscriber, collected) = CollectingSubscriber::<Value>::with_handle();
    publisher.subscribe(Box::new(subscriber.with_initial_request(5)));

    assert!(collected.wait_for_items(5, SETTLE).await);
    collected.cancel();
    assert!(collected.wait_released(SETTLE).await);

    assert_eq!(collected.len(), 5);
    assert_eq!(collected.items()[4], json!({ "tick": 4 }));
    assert_eq!(pulls.load(Ordering::SeqCst), 5);
}
