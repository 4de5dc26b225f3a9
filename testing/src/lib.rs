//! # Suspend Bridge Testing
//!
//! Testing utilities for the suspend bridge.
//!
//! This crate provides:
//! - A recording mock host ([`MockRequestContext`], [`MockResponse`])
//! - A recording request-scope manager ([`RecordingScopeManager`])
//! - Closure-backed invokers and filters ([`invoker`], [`request_filter`],
//!   [`response_filter`]) and a non-suspendable [`BlockingInvoker`]
//! - Deterministic suspension points ([`suspend_times`], [`YieldOnce`])
//! - A collecting stream subscriber ([`CollectingSubscriber`])
//!
//! ## Example
//!
//! ```ignore
//! use suspend_bridge_testing::{MockRequestContext, RecordingScopeManager, invoker, suspend_times};
//!
//! #[tokio::test]
//! async fn test_hello() {
//!     let event_loop = EventLoop::spawn("test");
//!     let scopes = Arc::new(RecordingScopeManager::new());
//!     let bridge = InvocationBridge::new(tasks, scopes.clone(), invoker("hello", |_, _| async {
//!         suspend_times(2).await;
//!         Ok(HandlerOutput::value("hi"))
//!     }));
//!
//!     let request = Arc::new(MockRequestContext::new(1, event_loop));
//!     bridge.handle(request.clone());
//!
//!     assert!(request.wait_settled(Duration::from_secs(1)).await);
//!     assert_eq!(scopes.activations(request.request_id()), 3);
//! }
//! ```

pub mod handlers;
pub mod host;
pub mod scope;
pub mod subscriber;

pub use handlers::{
    BlockingInvoker, FnInvoker, FnRequestFilter, FnResponseFilter, YieldOnce, invoker,
    request_filter, response_filter, suspend_times,
};
pub use host::{HostEvent, MockRequestContext, MockResponse};
pub use scope::{RecordingScopeManager, RequestBeans, ScopeEvent};
pub use subscriber::{CollectingSubscriber, Collected, Terminal};

/// Install a `tracing` subscriber for tests.
///
/// Honours `RUST_LOG`; defaults to debug output for the bridge crates.
/// Safe to call from every test.
pub fn init_test_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "suspend_bridge_runtime=debug,suspend_bridge_core=debug".into()),
        )
        .with(fmt::layer().with_test_writer())
        .try_init();
}
