//! Error taxonomy shared by the bridge and its host.
//!
//! - **Wiring errors** ([`BridgeError::InvalidWiring`]): the configured invoker
//!   cannot suspend. Fatal for the request, surfaced before any task launches.
//! - **Handler failures** ([`HandlerError`]): raised by user code inside the
//!   task and forwarded to the host's exception mappers.
//! - **Cancellation**: not a failure. Only a task whose token fired settles
//!   as `Cancelled`, and nothing is forwarded. A handler that returns
//!   [`HandlerError::Cancelled`] itself is reported like any other failure.

use crate::context::RequestId;
use thiserror::Error;

/// Failure produced while running a handler, filter, or stream.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// An I/O operation performed by the handler failed.
    #[error("I/O failure in handler: {0}")]
    Io(#[from] std::io::Error),

    /// The handler returned an application error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// The handler panicked; the panic message is preserved.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Raised by handler code that gave up because it saw a cancellation.
    #[error("Handler cancelled")]
    Cancelled,

    /// A stream subscriber requested zero elements.
    #[error("Subscriber requested zero elements")]
    InvalidDemand,
}

impl HandlerError {
    /// Create an application failure from a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(anyhow::Error::msg(message.into()))
    }

    /// Whether this is the [`Self::Cancelled`] variant.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors surfaced by the bridge to the host.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The configured invoker does not implement the suspendable capability.
    #[error("Invoker `{invoker}` is not a valid suspendable invoker")]
    InvalidWiring {
        /// Name of the offending invoker
        invoker: String,
    },

    /// The handler or filter failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// A captured request scope was activated twice without deactivation.
    #[error("Request scope for {0} is already active")]
    ScopeAlreadyActive(RequestId),

    /// The task scope is shutting down and rejects new tasks.
    #[error("Task scope is shutting down")]
    ShutdownInProgress,

    /// Shutdown timed out waiting for tasks to settle.
    #[error("Shutdown timed out with {0} tasks still running")]
    ShutdownTimeout(usize),

    /// The host executor no longer accepts work.
    #[error("Host executor `{0}` is closed")]
    ExecutorClosed(String),
}

impl BridgeError {
    /// The handler failure wrapped by this error, if any.
    #[must_use]
    pub const fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            Self::Handler(error) => Some(error),
            _ => None,
        }
    }
}
