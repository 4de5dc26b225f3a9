//! Echo Demo - suspendable handlers behind an in-process host
//!
//! Runs a handful of requests through a request filter and an invocation
//! bridge on a single event loop, using the recording mock host from
//! `suspend-bridge-testing` in place of a real HTTP server:
//!
//! 1. A request that suspends and echoes its parameter
//! 2. A request rejected by the filter
//! 3. A handler failure routed to the exception mappers
//! 4. A client disconnect that cancels a slow handler
//! 5. A streaming response pulled by a subscriber
//!
//! # Running the Example
//!
//! ```bash
//! RUST_LOG=debug cargo run -p echo-demo
//! ```

#![allow(missing_docs)]

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use suspend_bridge_core::{
    FilterOutcome, HandlerError, HandlerOutput, Publisher, RequestContext, RequestId,
    ResponseBody,
};
use suspend_bridge_runtime::metrics::MetricsServer;
use suspend_bridge_runtime::{
    BridgeConfig, Dispatch, EventLoop, InvocationBridge, RequestFilterBridge, TaskScope,
};
use suspend_bridge_testing::{
    CollectingSubscriber, MockRequestContext, RecordingScopeManager, invoker, request_filter,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SETTLE: Duration = Duration::from_secs(2);

struct Host {
    event_loop: Arc<EventLoop>,
    filter: RequestFilterBridge,
    echo: InvocationBridge,
}

impl Host {
    /// Filter then invoke, the way a server's request chain would.
    async fn serve(&self, request: &Arc<MockRequestContext>) -> anyhow::Result<()> {
        if let Some(handle) = self.filter.handle(request.clone()).handle() {
            let state = handle.settled().await;
            tracing::info!(request_id = %request_id(request), %state, "Request filter settled");
        }
        self.event_loop.barrier().await?;

        match self.echo.handle(request.clone()) {
            Dispatch::Skipped => tracing::info!(request_id = %request_id(request), "Handler skipped"),
            Dispatch::Rejected => tracing::warn!(request_id = %request_id(request), "Handler rejected"),
            Dispatch::Dispatched(handle) => {
                let state = handle.settled().await;
                tracing::info!(request_id = %request_id(request), %state, "Handler settled");
            }
        }
        self.event_loop.barrier().await?;
        Ok(())
    }
}

fn request_id(request: &MockRequestContext) -> u64 {
    request.request_id().value()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,suspend_bridge_runtime=debug,echo_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Echo Demo");

    // 2. Install the metrics recorder
    let mut metrics = MetricsServer::new("127.0.0.1:9000".parse()?);
    metrics.start()?;

    // 3. Wire the bridge
    let tasks = Arc::new(TaskScope::with_config(
        BridgeConfig::default().with_shutdown_timeout(Duration::from_secs(5)),
    ));
    let scopes = Arc::new(RecordingScopeManager::new());
    let event_loop = EventLoop::spawn("connection-0");

    let filter = RequestFilterBridge::new(
        Arc::clone(&tasks),
        Arc::clone(&scopes) as _,
        request_filter(|request| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let anonymous = request.parameters().first().is_none_or(Value::is_null);
            Ok(if anonymous {
                FilterOutcome::Abort(ResponseBody::Value(json!({ "error": "missing parameter" })))
            } else {
                FilterOutcome::Continue
            })
        }),
    );

    let echo = InvocationBridge::new(
        Arc::clone(&tasks),
        Arc::clone(&scopes) as _,
        invoker("Echo#get", |_instance, params| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            match params.first().and_then(Value::as_str) {
                Some("fail") => Err(HandlerError::failed("echo refused")),
                Some("slow") => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(HandlerOutput::NoContent)
                }
                Some("ticks") => Ok(HandlerOutput::stream(async_stream::stream! {
                    let mut tick = 0_u64;
                    loop {
                        yield Ok::<_, HandlerError>(json!({ "tick": tick }));
                        tick += 1;
                    }
                })),
                Some(text) => Ok(HandlerOutput::value(text.to_uppercase())),
                None => Ok(HandlerOutput::NoContent),
            }
        }),
    );

    let host = Host {
        event_loop: Arc::clone(&event_loop),
        filter,
        echo,
    };
    let request = |id: u64, parameter: Value| {
        Arc::new(
            MockRequestContext::new(id, Arc::clone(&event_loop) as _)
                .with_parameters(vec![parameter]),
        )
    };

    // 4. Echo
    let hello = request(1, json!("hello"));
    host.serve(&hello).await?;
    tracing::info!(result = ?hello.result_value(), "Echo response");

    // 5. Filter abort
    let anonymous = request(2, Value::Null);
    host.serve(&anonymous).await?;
    tracing::info!(result = ?anonymous.result_value(), "Filtered response");

    // 6. Handler failure
    let failing = request(3, json!("fail"));
    host.serve(&failing).await?;
    for (error, resource_method_known) in failing.take_exceptions() {
        tracing::info!(%error, resource_method_known, "Exception mapped");
    }

    // 7. Client disconnect
    let slow = request(4, json!("slow"));
    let disconnect = {
        let slow = Arc::clone(&slow);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            slow.fire_close();
        })
    };
    host.serve(&slow).await?;
    disconnect.await?;
    tracing::info!(closed = slow.close_count(), "Slow request abandoned by client");

    // 8. Streaming response
    let ticks = request(5, json!("ticks"));
    host.serve(&ticks).await?;
    if let Some(publisher) = ticks.take_result().and_then(ResponseBody::into_publisher) {
        let (subscriber, collected) = CollectingSubscriber::<Value>::with_handle();
        publisher.subscribe(Box::new(subscriber.with_initial_request(3).cancel_after(3)));
        if !collected.wait_released(SETTLE).await {
            tracing::warn!("Stream still running after cancellation");
        }
        tracing::info!(items = ?collected.items(), "Streamed ticks");
    }

    // 9. Graceful shutdown
    tasks.shutdown_default().await?;
    event_loop.close();
    tracing::info!(
        balanced = [1, 2, 3, 4, 5]
            .into_iter()
            .all(|id| scopes.is_strictly_paired(RequestId::new(id))),
        "Request scopes balanced"
    );

    if let Some(text) = metrics.render() {
        tracing::info!(lines = text.lines().count(), "Metrics rendered");
    }

    tracing::info!("✓ Clean shutdown complete");
    Ok(())
}
