//! # Suspend Bridge Runtime
//!
//! Runs suspending request handlers as structured tasks while keeping every
//! resumption on the connection's own event loop.
//!
//! ## Core Components
//!
//! - **Task Scope** ([`TaskScope`]): process-wide supervisor; every request
//!   task is a cancellable child of it
//! - **Event-Loop Dispatcher** ([`EventLoopDispatcher`]): schedules each
//!   resumption back onto the connection's [`HostExecutor`](suspend_bridge_core::HostExecutor)
//!   with the request scope activated
//! - **Request-Scope Capture** ([`CapturedScope`]): snapshot taken before the
//!   pipeline suspends, re-activated around every resumption
//! - **Invocation Bridge** ([`InvocationBridge`]): the handler-chain stage that
//!   suspends the host pipeline, runs the handler, and resumes the pipeline
//! - **Cancellation Wire** ([`Completion`]): the connection-close handshake
//!   guaranteeing exactly one of "deliver" or "abort"
//! - **Stream Adapter** ([`StreamPublisher`]): lazy sequences to publishers
//! - **Filter Bridges** ([`RequestFilterBridge`], [`ResponseFilterBridge`])
//!
//! ## Request Flow
//!
//! ```text
//! host chain ──handle()──► suspend() ─► capture scope ─► launch task
//!                                                           │
//!      ┌────────────── event loop (one continuation at a time) ◄──┘
//!      │  activate scope ─► enter current request ─► poll handler
//!      │  leave current request ─► deactivate scope
//!      └─► completed: set_result + resume()   failed: handle_exception + resume()
//!          connection closed first: close_connection(), nothing written
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use suspend_bridge_runtime::{EventLoop, InvocationBridge, TaskScope};
//!
//! let tasks = Arc::new(TaskScope::new());
//! let bridge = InvocationBridge::new(Arc::clone(&tasks), scope_manager, invoker);
//!
//! // Called by the host handler chain, on the connection's event loop
//! bridge.handle(request_context);
//!
//! // Application shutdown cancels every outstanding request task
//! tasks.shutdown(Duration::from_secs(30)).await?;
//! ```

/// Bridge configuration
pub mod config;

/// Execution identity installed into every request task
pub mod identity;

/// Dispatched task cells and continuations
pub mod task;

/// The process-wide task scope
pub mod scope;

/// Reference single-threaded host executor
pub mod event_loop;

/// Request-scope snapshot and activation guard
pub mod capture;

/// Event-loop dispatcher
pub mod dispatcher;

/// Completion handshake between the task and the connection-close handler
pub mod completion;

/// The shared suspend/launch/resume protocol and the invocation bridge
pub mod bridge;

/// Request- and response-filter bridges
pub mod filter;

/// Stream-to-publisher adapter
pub mod stream;

/// Prometheus metrics for observability
pub mod metrics;

pub use bridge::{Dispatch, InvocationBridge, InvocationHandle};
pub use capture::{CapturedScope, ScopeActivation};
pub use completion::{Completion, InvocationState};
pub use config::BridgeConfig;
pub use dispatcher::EventLoopDispatcher;
pub use event_loop::EventLoop;
pub use filter::{RequestFilterBridge, ResponseFilterBridge};
pub use identity::ExecutionIdentity;
pub use scope::{TaskHandle, TaskScope};
pub use stream::StreamPublisher;
pub use task::{Continuation, Dispatcher, TaskId};
