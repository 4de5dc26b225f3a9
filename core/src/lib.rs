//! # Suspend Bridge Core
//!
//! Host-facing traits and value types for the suspendable request-dispatch
//! bridge.
//!
//! The bridge lets a single HTTP request handler run long-lived, suspending
//! work without blocking the event loop that owns its connection. Everything
//! the bridge needs from the surrounding web framework is described here as a
//! trait, so the runtime crate never depends on a concrete server.
//!
//! ## Collaborators
//!
//! - **[`RequestContext`]**: per-request host object (result slot,
//!   suspend/resume, close notifications, exception routing)
//! - **[`HostExecutor`]**: the connection's single-threaded "run on this
//!   context" primitive, plus its [`CurrentRequest`] slot
//! - **[`RequestScopeManager`]**: the DI container's request-scope manager
//! - **[`EndpointInvoker`] / [`SuspendableInvoker`]**: build-time glue that
//!   calls the user's handler
//! - **[`Publisher`] / [`Subscriber`]**: the reactive abstraction the
//!   streaming response writer consumes
//!
//! ## Example
//!
//! ```ignore
//! use suspend_bridge_core::{HandlerOutput, SuspendableInvoker};
//!
//! struct GreetingInvoker;
//!
//! impl SuspendableInvoker for GreetingInvoker {
//!     fn invoke(&self, _instance: EndpointInstance, params: Parameters) -> HandlerFuture {
//!         Box::pin(async move {
//!             tokio::time::sleep(Duration::from_millis(10)).await;
//!             Ok(HandlerOutput::value(format!("hello {}", params[0])))
//!         })
//!     }
//! }
//! ```

pub mod context;
pub mod error;
pub mod executor;
pub mod filter;
pub mod invoker;
pub mod output;
pub mod publisher;
pub mod scope;

// Re-export commonly used types
pub use context::{
    CloseHandler, EndpointInstance, Parameters, RequestContext, RequestId, ResponseContext,
};
pub use error::{BridgeError, HandlerError};
pub use executor::{CurrentRequest, CurrentRequestGuard, HostExecutor, Job};
pub use filter::{FilterOutcome, SuspendableRequestFilter, SuspendableResponseFilter};
pub use invoker::{EndpointInvoker, HandlerFuture, InvokerKind, SuspendableInvoker};
pub use output::{HandlerOutput, ResponseBody, ValueStream};
pub use publisher::{Demand, Publisher, Subscriber, Subscription};
pub use scope::{RequestScopeManager, ScopeSnapshot};
pub use serde_json::Value;
