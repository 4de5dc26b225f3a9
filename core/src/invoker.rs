//! Build-time wiring: the glue that calls a user's handler method.
//!
//! Generated code implements [`EndpointInvoker`] for every endpoint. Endpoints
//! whose handler can suspend additionally expose [`SuspendableInvoker`]
//! through [`EndpointInvoker::as_suspendable`]. The capability is checked once,
//! when a bridge is built, yielding an [`InvokerKind`].

use crate::context::{EndpointInstance, Parameters};
use crate::error::HandlerError;
use crate::output::HandlerOutput;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Future returned by a suspendable handler.
pub type HandlerFuture = BoxFuture<'static, Result<HandlerOutput, HandlerError>>;

/// Invoker whose handler may suspend any number of times.
pub trait SuspendableInvoker: Send + Sync + 'static {
    /// Start the handler for `instance` with `parameters`.
    fn invoke(&self, instance: EndpointInstance, parameters: Parameters) -> HandlerFuture;
}

/// Any invoker produced by build-time wiring.
pub trait EndpointInvoker: Send + Sync + 'static {
    /// Name used in wiring errors and logs (e.g. `GreetingResource#hello`).
    fn name(&self) -> &str;

    /// The suspendable capability, if this invoker has one.
    fn as_suspendable(self: Arc<Self>) -> Option<Arc<dyn SuspendableInvoker>> {
        None
    }
}

/// Result of the one-time capability check.
#[derive(Clone)]
pub enum InvokerKind {
    /// The invoker can run suspending handlers.
    Valid(Arc<dyn SuspendableInvoker>),

    /// The invoker was wired to the bridge but cannot suspend.
    InvalidWiring {
        /// Name of the offending invoker
        invoker: String,
    },
}

impl InvokerKind {
    /// Classify `invoker` by its capabilities.
    #[must_use]
    pub fn check(invoker: Arc<dyn EndpointInvoker>) -> Self {
        let name = invoker.name().to_string();
        match invoker.as_suspendable() {
            Some(suspendable) => Self::Valid(suspendable),
            None => Self::InvalidWiring { invoker: name },
        }
    }

    /// Whether the check succeeded.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

impl fmt::Debug for InvokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid(_) => write!(f, "InvokerKind::Valid(<invoker>)"),
            Self::InvalidWiring { invoker } => f
                .debug_struct("InvokerKind::InvalidWiring")
                .field("invoker", invoker)
                .finish(),
        }
    }
}
